//! One-step-ahead targets, station encoding and scaling.

use anyhow::{Context, Result, ensure};
use tracing::info;

use crate::features::FeatureRow;
use crate::table::{ProcessedRow, SCALED_COLUMNS};
use crate::transform::{MinMaxScaler, StationEncoder};

/// A feature row paired with the next interval's values of the same station.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub features: FeatureRow,
    pub future_energy: f64,
    pub future_available_ports: u32,
}

/// Attaches next-interval targets per station.
///
/// Expects rows grouped by station and time-ordered within a station, as
/// produced by [`crate::features::engineer`]. The last row of each station
/// has no target and is dropped; the number of dropped rows is returned.
pub fn attach_targets(rows: Vec<FeatureRow>) -> (Vec<TargetRow>, usize) {
    let total = rows.len();
    let mut out = Vec::with_capacity(total);

    for station_rows in rows.chunk_by(|a, b| a.grid.station == b.grid.station) {
        for pair in station_rows.windows(2) {
            out.push(TargetRow {
                features: pair[0].clone(),
                future_energy: pair[1].grid.energy_kwh,
                future_available_ports: pair[1].grid.available_ports,
            });
        }
    }

    let dropped = total - out.len();
    (out, dropped)
}

/// The final table plus the transforms fitted over it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTable {
    pub rows: Vec<ProcessedRow>,
    pub scaler: MinMaxScaler,
    pub encoder: StationEncoder,
}

/// Encodes stations and min-max scales the continuous columns in place.
///
/// # Errors
///
/// Fails when no rows remain, since neither transform can be fit.
#[tracing::instrument(skip_all, fields(rows = rows.len()))]
pub fn scale_and_encode(rows: Vec<TargetRow>) -> Result<ProcessedTable> {
    ensure!(!rows.is_empty(), "no rows left after target construction");

    let encoder = StationEncoder::fit(rows.iter().map(|r| r.features.grid.station.as_str()));

    let mut table: Vec<ProcessedRow> = rows
        .into_iter()
        .map(|r| {
            let f = r.features;
            let station_id_encoded = encoder
                .encode(&f.grid.station)
                .with_context(|| format!("station '{}' missing from encoder", f.grid.station))?;
            Ok(ProcessedRow {
                timestamp: f.grid.timestamp,
                station_name: f.grid.station,
                station_id_encoded,
                available_ports: f64::from(f.grid.available_ports),
                energy_kwh: f.grid.energy_kwh,
                hour: f64::from(f.hour),
                day_of_week: f64::from(f.day_of_week),
                month: f64::from(f.month),
                is_weekend: u8::from(f.is_weekend),
                energy_roll_3: f.energy_roll_3,
                energy_roll_6: f.energy_roll_6,
                future_energy: r.future_energy,
                future_available_ports: r.future_available_ports,
            })
        })
        .collect::<Result<_>>()?;

    let raw: Vec<[f64; 7]> = table.iter().map(ProcessedRow::scaled_values).collect();
    let scaler = MinMaxScaler::fit(&SCALED_COLUMNS, &raw)?;

    for row in &mut table {
        let mut values = row.scaled_values();
        scaler.transform_row(&mut values);
        row.set_scaled_values(values);
    }

    info!(
        rows = table.len(),
        stations = encoder.len(),
        "Processed table scaled and encoded"
    );

    Ok(ProcessedTable {
        rows: table,
        scaler,
        encoder,
    })
}
