//! CSV reader for raw charging-session exports.
//!
//! Columns are looked up by header name so that extra columns are ignored and
//! identifying columns are never read into memory.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::StringRecord;
use tracing::{debug, info};

pub const STATION_NAME: &str = "Station Name";
pub const PORT_NUMBER: &str = "Port Number";
pub const START_DATE: &str = "Start Date";
pub const END_DATE: &str = "End Date";
pub const ENERGY_KWH: &str = "Energy (kWh)";
pub const CHARGING_TIME: &str = "Charging Time (hh:mm:ss)";
pub const TOTAL_DURATION: &str = "Total Duration (hh:mm:ss)";

/// Columns carrying personal data. Dropped on read when present.
pub const PII_COLUMNS: &[&str] = &["User ID", "Driver Postal Code"];

/// One raw row, every field still textual. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSession {
    pub station: String,
    pub port: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub energy_kwh: Option<String>,
    pub charging_time: Option<String>,
    pub total_duration: Option<String>,
}

/// The raw table plus what the reader learned about its schema.
#[derive(Debug, Default)]
pub struct RawTable {
    pub sessions: Vec<RawSession>,
    pub pii_columns_dropped: Vec<String>,
}

struct ColumnIndex {
    station: usize,
    port: usize,
    start: usize,
    end: usize,
    energy: usize,
    charging_time: Option<usize>,
    total_duration: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let positions: HashMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

        let required = |name: &str| {
            positions
                .get(name)
                .copied()
                .with_context(|| format!("missing mandatory column '{name}'"))
        };

        let index = Self {
            station: required(STATION_NAME)?,
            port: required(PORT_NUMBER)?,
            start: required(START_DATE)?,
            end: required(END_DATE)?,
            energy: required(ENERGY_KWH)?,
            charging_time: positions.get(CHARGING_TIME).copied(),
            total_duration: positions.get(TOTAL_DURATION).copied(),
        };

        if index.charging_time.is_none() && index.total_duration.is_none() {
            bail!("missing mandatory column: need '{CHARGING_TIME}' or '{TOTAL_DURATION}'");
        }

        Ok(index)
    }

    fn read(&self, record: &StringRecord) -> RawSession {
        let cell = |i: usize| {
            record
                .get(i)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        RawSession {
            station: cell(self.station).unwrap_or_default(),
            port: cell(self.port),
            start: cell(self.start),
            end: cell(self.end),
            energy_kwh: cell(self.energy),
            charging_time: self.charging_time.and_then(cell),
            total_duration: self.total_duration.and_then(cell),
        }
    }
}

/// Reads a raw session export from `path`.
///
/// # Errors
///
/// Fails if the file cannot be opened, is not valid CSV, or lacks a mandatory column.
#[tracing::instrument(fields(path = %path.display()))]
pub fn read_sessions(path: &Path) -> Result<RawTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open raw session table {}", path.display()))?;
    let table = read_sessions_from(file)?;
    info!(rows = table.sessions.len(), "Raw session table loaded");
    Ok(table)
}

/// Reads a raw session export from any reader.
pub fn read_sessions_from<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    let index = ColumnIndex::from_headers(&headers)?;

    let pii_columns_dropped: Vec<String> = headers
        .iter()
        .map(str::trim)
        .filter(|h| PII_COLUMNS.contains(h))
        .map(str::to_string)
        .collect();
    if !pii_columns_dropped.is_empty() {
        debug!(columns = ?pii_columns_dropped, "Dropping identifying columns");
    }

    let mut sessions = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", line + 1))?;
        sessions.push(index.read(&record));
    }

    Ok(RawTable {
        sessions,
        pii_columns_dropped,
    })
}
