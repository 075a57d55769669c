//! Fixed-length training windows over the processed table.

use std::collections::BTreeMap;

use crate::table::ProcessedRow;

/// One model input: `seq_length` consecutive rows of one station.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub station: String,
    pub features: Vec<[f64; 8]>,
    /// `(future_energy, future_available_ports)` of the window's last row.
    pub target: (f64, f64),
}

/// Groups rows per station in time order.
pub fn station_series(rows: &[ProcessedRow]) -> BTreeMap<&str, Vec<&ProcessedRow>> {
    let mut series: BTreeMap<&str, Vec<&ProcessedRow>> = BTreeMap::new();
    for row in rows {
        series.entry(row.station_name.as_str()).or_default().push(row);
    }
    for station_rows in series.values_mut() {
        station_rows.sort_by_key(|r| r.timestamp);
    }
    series
}

/// Number of windows a station with `len` rows yields.
///
/// A station yields `len - seq_length` windows, so the window ending on the
/// station's final row is never emitted.
pub fn window_count(len: usize, seq_length: usize) -> usize {
    len.saturating_sub(seq_length)
}

/// Cuts every station's series into windows of `seq_length` rows.
pub fn build_windows(rows: &[ProcessedRow], seq_length: usize) -> Vec<Window> {
    if seq_length == 0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    for (station, series) in station_series(rows) {
        for i in 0..window_count(series.len(), seq_length) {
            let slice = &series[i..i + seq_length];
            let last = slice[seq_length - 1];
            windows.push(Window {
                station: station.to_string(),
                features: slice.iter().map(|r| r.input_features()).collect(),
                target: (last.future_energy, f64::from(last.future_available_ports)),
            });
        }
    }
    windows
}
