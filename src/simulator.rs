//! Per-station state simulation.
//!
//! Each station's event subsequence is folded into a right-continuous step
//! function of (occupied ports, load) and sampled on a fixed grid. Stations
//! are independent, so the fan-out runs on rayon and the results are merged
//! in station-name order.

use std::collections::BTreeMap;

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::events::StateEvent;
use crate::session::Session;

/// Load below this is treated as float noise from cancelling deltas, not a clip.
const LOAD_EPSILON: f64 = 1e-9;

/// Occupancy ceiling per station: the highest port index seen, at least 1.
///
/// This is a modelling assumption, not a measurement: a station whose busiest
/// port never appears in the export is under-counted.
pub fn station_capacities(sessions: &[Session]) -> BTreeMap<String, u32> {
    let mut capacities: BTreeMap<String, u32> = BTreeMap::new();
    for s in sessions {
        let capacity = capacities.entry(s.station.clone()).or_insert(1);
        if let Some(port) = s.port {
            *capacity = (*capacity).max(port);
        }
    }
    capacities
}

/// Splits the ordered stream into per-station sequences, preserving order.
pub fn group_by_station(events: &[StateEvent]) -> BTreeMap<&str, Vec<&StateEvent>> {
    let mut groups: BTreeMap<&str, Vec<&StateEvent>> = BTreeMap::new();
    for e in events {
        groups.entry(e.station.as_str()).or_default().push(e);
    }
    groups
}

/// Running station state at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StationState {
    pub occupied: i64,
    pub load_kw: f64,
}

/// A right-continuous piecewise-constant function of time.
///
/// `values[i]` holds on `[breakpoints[i], breakpoints[i + 1])`; before the
/// first breakpoint the function is `T::default()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFunction<T> {
    breakpoints: Vec<NaiveDateTime>,
    values: Vec<T>,
}

impl<T: Copy + Default> StepFunction<T> {
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.breakpoints.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.breakpoints.last().copied()
    }

    /// Value at `t` by binary search.
    pub fn value_at(&self, t: NaiveDateTime) -> T {
        match self.breakpoints.partition_point(|b| *b <= t) {
            0 => T::default(),
            i => self.values[i - 1],
        }
    }

    /// Samples at ascending `points` with a single merge scan.
    pub fn sample(&self, points: &[NaiveDateTime]) -> Vec<T> {
        let mut j = 0;
        points
            .iter()
            .map(|p| {
                while j < self.breakpoints.len() && self.breakpoints[j] <= *p {
                    j += 1;
                }
                if j == 0 { T::default() } else { self.values[j - 1] }
            })
            .collect()
    }
}

/// Occupancy and load of one station over time.
pub type StateFunction = StepFunction<StationState>;

impl StateFunction {
    /// Folds one station's time-ordered events into running totals.
    ///
    /// Totals run over every event; where several events share a timestamp
    /// only the last running total at that instant is kept. That hides any
    /// swing between simultaneous events, so the number of collapsed events
    /// is returned for diagnosis.
    pub fn from_events<'a, I>(events: I) -> (Self, usize)
    where
        I: IntoIterator<Item = &'a StateEvent>,
    {
        let mut breakpoints: Vec<NaiveDateTime> = Vec::new();
        let mut values: Vec<StationState> = Vec::new();
        let mut running = StationState::default();
        let mut collisions = 0;

        for e in events {
            running.occupied += e.occupancy_delta;
            running.load_kw += e.load_delta_kw;

            if breakpoints.last() == Some(&e.timestamp) {
                collisions += 1;
                if let Some(v) = values.last_mut() {
                    *v = running;
                }
            } else {
                breakpoints.push(e.timestamp);
                values.push(running);
            }
        }

        (Self { breakpoints, values }, collisions)
    }
}

fn from_epoch_seconds(secs: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.naive_utc())
        .with_context(|| format!("grid point {secs}s is out of range"))
}

/// Builds the inclusive grid from `first` floored to `last` ceiled.
///
/// Flooring works on whole epoch seconds, so it holds for every
/// representable timestamp.
pub fn build_grid(
    first: NaiveDateTime,
    last: NaiveDateTime,
    interval: TimeDelta,
) -> Result<Vec<NaiveDateTime>> {
    let step = interval.num_seconds();
    ensure!(step > 0, "grid interval must be at least one second, got {interval}");

    let floor = |t: NaiveDateTime| t.and_utc().timestamp().div_euclid(step) * step;
    let start = from_epoch_seconds(floor(first))?;
    let mut end = from_epoch_seconds(floor(last))?;
    if end < last {
        end = end
            .checked_add_signed(interval)
            .with_context(|| format!("cannot ceil {last} to the grid"))?;
    }

    let mut grid = Vec::new();
    let mut t = start;
    while t <= end {
        grid.push(t);
        match t.checked_add_signed(interval) {
            Some(next) => t = next,
            None => break,
        }
    }
    Ok(grid)
}

/// One (station, grid timestamp) sample, before feature engineering.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    pub timestamp: NaiveDateTime,
    pub station: String,
    pub capacity: u32,
    pub occupied_ports: u32,
    pub load_kw: f64,
    pub available_ports: u32,
    pub energy_kwh: f64,
}

/// Data-correction counters. None of these fail the run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationDiagnostics {
    pub stations_simulated: usize,
    pub stations_skipped: usize,
    pub event_collisions: usize,
    pub clipped_above_capacity: usize,
    pub clipped_below_zero: usize,
    pub clipped_negative_load: usize,
    pub grid_rows: usize,
}

impl SimulationDiagnostics {
    fn merge(mut self, other: Self) -> Self {
        self.stations_simulated += other.stations_simulated;
        self.stations_skipped += other.stations_skipped;
        self.event_collisions += other.event_collisions;
        self.clipped_above_capacity += other.clipped_above_capacity;
        self.clipped_below_zero += other.clipped_below_zero;
        self.clipped_negative_load += other.clipped_negative_load;
        self.grid_rows += other.grid_rows;
        self
    }
}

/// Simulates one station and projects it onto the grid.
///
/// A station without events yields no rows.
pub fn simulate_station(
    station: &str,
    events: &[&StateEvent],
    capacity: u32,
    config: &PipelineConfig,
) -> Result<(Vec<GridRow>, SimulationDiagnostics)> {
    let mut diagnostics = SimulationDiagnostics::default();

    let (state, collisions) = StateFunction::from_events(events.iter().copied());
    let (Some(first), Some(last)) = (state.first(), state.last()) else {
        diagnostics.stations_skipped = 1;
        return Ok((Vec::new(), diagnostics));
    };
    diagnostics.stations_simulated = 1;
    diagnostics.event_collisions = collisions;

    let grid = build_grid(first, last, config.interval())?;
    let samples = state.sample(&grid);
    let interval_hours = config.interval_hours();

    let rows: Vec<GridRow> = grid
        .into_iter()
        .zip(samples)
        .map(|(timestamp, s)| {
            if s.occupied > i64::from(capacity) {
                diagnostics.clipped_above_capacity += 1;
            } else if s.occupied < 0 {
                diagnostics.clipped_below_zero += 1;
            }
            if s.load_kw < -LOAD_EPSILON {
                diagnostics.clipped_negative_load += 1;
            }

            let occupied = s.occupied.clamp(0, i64::from(capacity)) as u32;
            let load_kw = s.load_kw.max(0.0);
            GridRow {
                timestamp,
                station: station.to_string(),
                capacity,
                occupied_ports: occupied,
                load_kw,
                available_ports: capacity - occupied,
                energy_kwh: load_kw * interval_hours,
            }
        })
        .collect();

    diagnostics.grid_rows = rows.len();
    debug!(
        station,
        capacity,
        rows = rows.len(),
        collisions,
        "Station simulated"
    );
    Ok((rows, diagnostics))
}

/// Runs [`simulate_station`] for every station in parallel and concatenates
/// the grids in station-name order.
#[tracing::instrument(skip_all, fields(events = events.len(), stations = capacities.len()))]
pub fn simulate_all(
    events: &[StateEvent],
    capacities: &BTreeMap<String, u32>,
    config: &PipelineConfig,
) -> Result<(Vec<GridRow>, SimulationDiagnostics)> {
    let groups: Vec<(&str, Vec<&StateEvent>)> = group_by_station(events).into_iter().collect();

    let run = || {
        groups
            .par_iter()
            .map(|(station, station_events)| {
                let capacity = capacities.get(*station).copied().unwrap_or(1);
                simulate_station(station, station_events, capacity, config)
                    .with_context(|| format!("simulation failed for station '{station}'"))
            })
            .collect::<Result<Vec<_>>>()
    };

    let per_station = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .context("failed to build simulation thread pool")?
            .install(run)?,
        None => run()?,
    };

    let mut rows = Vec::new();
    let mut diagnostics = SimulationDiagnostics::default();
    for (station_rows, station_diagnostics) in per_station {
        rows.extend(station_rows);
        diagnostics = diagnostics.merge(station_diagnostics);
    }

    let clipped = diagnostics.clipped_above_capacity
        + diagnostics.clipped_below_zero
        + diagnostics.clipped_negative_load;
    if clipped > 0 || diagnostics.event_collisions > 0 {
        warn!(
            above_capacity = diagnostics.clipped_above_capacity,
            below_zero = diagnostics.clipped_below_zero,
            negative_load = diagnostics.clipped_negative_load,
            collisions = diagnostics.event_collisions,
            "State corrections applied during simulation"
        );
    }
    info!(
        stations = diagnostics.stations_simulated,
        rows = rows.len(),
        "Station grids built"
    );

    Ok((rows, diagnostics))
}
