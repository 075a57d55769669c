//! The processed table: the pipeline's output schema and its CSV codec.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Column order of the processed CSV.
pub const COLUMNS: [&str; 13] = [
    "timestamp",
    "station_name",
    "station_id_encoded",
    "available_ports",
    "energy_kwh",
    "hour",
    "day_of_week",
    "month",
    "is_weekend",
    "energy_roll_3",
    "energy_roll_6",
    "future_energy",
    "future_available_ports",
];

/// Columns min-max scaled in place, in scaler fit order.
pub const SCALED_COLUMNS: [&str; 7] = [
    "available_ports",
    "energy_kwh",
    "energy_roll_3",
    "energy_roll_6",
    "hour",
    "day_of_week",
    "month",
];

/// Model input features, in the order every window row carries them.
pub const INPUT_FEATURES: [&str; 8] = [
    "available_ports",
    "energy_kwh",
    "hour",
    "day_of_week",
    "month",
    "is_weekend",
    "energy_roll_3",
    "energy_roll_6",
];

/// Index of `is_weekend` within [`INPUT_FEATURES`].
pub const WEEKEND_FEATURE: usize = 5;

pub(crate) mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&t.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(D::Error::custom)
    }
}

/// One row of the processed table.
///
/// The seven [`SCALED_COLUMNS`] hold scaled values; `is_weekend`,
/// `station_id_encoded` and both targets are in their natural units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRow {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub station_name: String,
    pub station_id_encoded: u32,
    pub available_ports: f64,
    pub energy_kwh: f64,
    pub hour: f64,
    pub day_of_week: f64,
    pub month: f64,
    pub is_weekend: u8,
    pub energy_roll_3: f64,
    pub energy_roll_6: f64,
    pub future_energy: f64,
    pub future_available_ports: u32,
}

impl ProcessedRow {
    /// The row's model inputs in [`INPUT_FEATURES`] order.
    pub fn input_features(&self) -> [f64; 8] {
        [
            self.available_ports,
            self.energy_kwh,
            self.hour,
            self.day_of_week,
            self.month,
            f64::from(self.is_weekend),
            self.energy_roll_3,
            self.energy_roll_6,
        ]
    }

    /// Values of the scaled columns in [`SCALED_COLUMNS`] order.
    pub fn scaled_values(&self) -> [f64; 7] {
        [
            self.available_ports,
            self.energy_kwh,
            self.energy_roll_3,
            self.energy_roll_6,
            self.hour,
            self.day_of_week,
            self.month,
        ]
    }

    pub(crate) fn set_scaled_values(&mut self, values: [f64; 7]) {
        [
            self.available_ports,
            self.energy_kwh,
            self.energy_roll_3,
            self.energy_roll_6,
            self.hour,
            self.day_of_week,
            self.month,
        ] = values;
    }
}

/// Serialises rows with a header line.
pub fn write_rows<W: Write>(writer: W, rows: &[ProcessedRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        wtr.write_record(COLUMNS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_rows_from<R: Read>(reader: R) -> Result<Vec<ProcessedRow>> {
    let mut rdr = csv::Reader::from_reader(reader);
    rdr.deserialize::<ProcessedRow>()
        .enumerate()
        .map(|(i, r)| r.with_context(|| format!("invalid processed row {}", i + 1)))
        .collect()
}

/// Loads a processed table from disk.
pub fn read_rows(path: &Path) -> Result<Vec<ProcessedRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open processed table {}", path.display()))?;
    read_rows_from(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::parse_timestamp;

    fn row() -> ProcessedRow {
        ProcessedRow {
            timestamp: parse_timestamp("2020-01-04 10:15").unwrap(),
            station_name: "PALO ALTO #1".to_string(),
            station_id_encoded: 0,
            available_ports: 0.5,
            energy_kwh: 0.25,
            hour: 0.4,
            day_of_week: 0.8,
            month: 0.0,
            is_weekend: 1,
            energy_roll_3: 0.1,
            energy_roll_6: 0.2,
            future_energy: 1.5,
            future_available_ports: 1,
        }
    }

    #[test]
    fn test_header_matches_column_contract() {
        let mut buf = Vec::new();
        write_rows(&mut buf, &[row()]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let header = text.lines().next().unwrap();
        assert_eq!(header, COLUMNS.join(","));
        assert!(text.lines().nth(1).unwrap().starts_with("2020-01-04 10:15:00,PALO ALTO #1,0,"));
    }

    #[test]
    fn test_empty_table_still_has_header() {
        let mut buf = Vec::new();
        write_rows(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn test_read_back_written_rows() {
        let mut buf = Vec::new();
        write_rows(&mut buf, &[row(), row()]).unwrap();
        let rows = read_rows_from(buf.as_slice()).unwrap();
        assert_eq!(rows, vec![row(), row()]);
    }

    #[test]
    fn test_feature_orders() {
        let r = row();
        assert_eq!(r.input_features(), [0.5, 0.25, 0.4, 0.8, 0.0, 1.0, 0.1, 0.2]);
        assert_eq!(r.scaled_values(), [0.5, 0.25, 0.1, 0.2, 0.4, 0.8, 0.0]);
        assert_eq!(INPUT_FEATURES[WEEKEND_FEATURE], "is_weekend");

        let mut r = r;
        r.set_scaled_values([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(r.scaled_values(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(r.hour, 5.0);
    }
}
