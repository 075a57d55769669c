//! Sanity checks over a processed table on disk.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::table::COLUMNS;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub rows: usize,
    pub columns: Vec<String>,
    pub schema_matches: bool,
    /// Empty cells per column, for every column in the file.
    pub nulls: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.schema_matches && self.warnings.is_empty()
    }
}

/// Reads a processed table as plain text and reports problems.
///
/// Only unreadable input is an error; data problems become warnings.
pub fn verify_from<R: Read>(reader: R) -> Result<VerifyReport> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("failed to read header")?.clone();

    let mut report = VerifyReport {
        columns: headers.iter().map(str::to_string).collect(),
        ..Default::default()
    };
    report.schema_matches = report.columns.iter().map(String::as_str).eq(COLUMNS);
    report.nulls = report.columns.iter().map(|c| (c.clone(), 0)).collect();

    let ports = headers.iter().position(|h| h == "available_ports");

    let mut negative_ports = 0;
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed record {}", i + 1))?;
        report.rows += 1;

        for (column, value) in report.columns.iter().zip(record.iter()) {
            if value.trim().is_empty() {
                if let Some(n) = report.nulls.get_mut(column) {
                    *n += 1;
                }
            }
        }

        let negative = ports
            .and_then(|j| record.get(j))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .is_some_and(|v| v < 0.0);
        if negative {
            negative_ports += 1;
        }
    }

    if !report.schema_matches {
        report
            .warnings
            .push(format!("columns differ from the expected {:?}", COLUMNS));
    }
    if negative_ports > 0 {
        report
            .warnings
            .push(format!("{negative_ports} rows with negative available ports"));
    }
    for name in ["energy_kwh", "future_energy"] {
        let nulls = report.nulls.get(name).copied().unwrap_or(0);
        if nulls > 0 {
            report.warnings.push(format!("{nulls} null values in {name}"));
        }
    }

    Ok(report)
}

/// Verifies the processed table at `path` and logs the outcome.
#[tracing::instrument(fields(path = %path.display()))]
pub fn verify(path: &Path) -> Result<VerifyReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open processed table {}", path.display()))?;
    let report = verify_from(file)?;

    info!(rows = report.rows, columns = report.columns.len(), "Processed table shape");
    for w in &report.warnings {
        warn!("{w}");
    }
    Ok(report)
}
