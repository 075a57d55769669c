//! Calendar and rolling-energy features on top of the station grids.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::simulator::GridRow;

/// Short rolling window, in grid intervals.
pub const ROLL_SHORT: usize = 3;
/// Long rolling window, in grid intervals.
pub const ROLL_LONG: usize = 6;

/// A grid row with calendar and rolling features attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub grid: GridRow,
    pub hour: u32,
    /// Monday = 0 … Sunday = 6.
    pub day_of_week: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub energy_roll_3: f64,
    pub energy_roll_6: f64,
}

/// Calendar fields of a grid timestamp: (hour, day of week, month, weekend).
pub fn calendar(timestamp: NaiveDateTime) -> (u32, u32, u32, bool) {
    let day_of_week = timestamp.weekday().num_days_from_monday();
    (timestamp.hour(), day_of_week, timestamp.month(), day_of_week >= 5)
}

/// Mean of the `window` values strictly before each position.
///
/// Positions without a full window of history get `0.0` rather than being
/// dropped, so short station histories survive at the cost of a cold-start
/// bias.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i < window {
                0.0
            } else {
                values[i - window..i].iter().sum::<f64>() / window as f64
            }
        })
        .collect()
}

/// Orders rows by (station, timestamp) and attaches features.
///
/// Rolling statistics are computed per station over that ordering.
#[tracing::instrument(skip_all, fields(rows = rows.len()))]
pub fn engineer(mut rows: Vec<GridRow>) -> Vec<FeatureRow> {
    rows.sort_by(|a, b| {
        a.station
            .cmp(&b.station)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    let mut out = Vec::with_capacity(rows.len());
    for station_rows in rows.chunk_by(|a, b| a.station == b.station) {
        let energy: Vec<f64> = station_rows.iter().map(|r| r.energy_kwh).collect();
        let roll_short = trailing_mean(&energy, ROLL_SHORT);
        let roll_long = trailing_mean(&energy, ROLL_LONG);

        for (i, row) in station_rows.iter().enumerate() {
            let (hour, day_of_week, month, is_weekend) = calendar(row.timestamp);
            out.push(FeatureRow {
                grid: row.clone(),
                hour,
                day_of_week,
                month,
                is_weekend,
                energy_roll_3: roll_short[i],
                energy_roll_6: roll_long[i],
            });
        }
    }
    out
}
