//! End-to-end reconstruction: raw sessions in, processed table and fitted
//! transforms out.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::events::build_event_stream;
use crate::features::engineer;
use crate::input::{RawTable, read_sessions};
use crate::output::{ENCODER_FILE, PROCESSED_FILE, REPORT_FILE, SCALER_FILE, StagedOutput};
use crate::session::{NormalizeReport, normalize};
use crate::simulator::{SimulationDiagnostics, simulate_all, station_capacities};
use crate::targets::{ProcessedTable, attach_targets, scale_and_encode};

/// Pipeline stages, named in error chains and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Normalize,
    Events,
    Simulate,
    Features,
    Targets,
    Scale,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Normalize => "normalize",
            Self::Events => "events",
            Self::Simulate => "simulate",
            Self::Features => "features",
            Self::Targets => "targets",
            Self::Scale => "scale",
            Self::Write => "write",
        };
        f.write_str(name)
    }
}

fn stage_failed(stage: Stage) -> String {
    format!("pipeline stage '{stage}' failed")
}

/// Counters collected over one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub pii_columns_dropped: Vec<String>,
    #[serde(flatten)]
    pub normalize: NormalizeReport,
    pub stations: usize,
    pub events: usize,
    #[serde(flatten)]
    pub simulation: SimulationDiagnostics,
    pub tail_rows_dropped: usize,
    pub final_rows: usize,
}

/// Runs every in-memory stage over an already loaded raw table.
///
/// # Errors
///
/// Fails with the stage name in the error chain when nothing survives
/// filtering or a transform cannot be fit. Row-level defects are counted in
/// the report instead.
pub fn run(raw: RawTable, config: &PipelineConfig) -> Result<(ProcessedTable, PipelineReport)> {
    let mut report = PipelineReport {
        pii_columns_dropped: raw.pii_columns_dropped,
        ..Default::default()
    };

    let (sessions, normalize_report) = normalize(&raw.sessions, config);
    report.normalize = normalize_report;
    ensure!(!sessions.is_empty(), "{}: no valid sessions", stage_failed(Stage::Normalize));

    let capacities = station_capacities(&sessions);
    report.stations = capacities.len();

    let events = build_event_stream(&sessions);
    report.events = events.len();
    info!(events = events.len(), stations = capacities.len(), "Event stream built");

    let (grid, diagnostics) =
        simulate_all(&events, &capacities, config).with_context(|| stage_failed(Stage::Simulate))?;
    report.simulation = diagnostics;
    ensure!(!grid.is_empty(), "{}: no grid rows", stage_failed(Stage::Simulate));

    let features = engineer(grid);

    let (targets, dropped) = attach_targets(features);
    report.tail_rows_dropped = dropped;
    ensure!(
        !targets.is_empty(),
        "{}: every station has a single grid row",
        stage_failed(Stage::Targets)
    );

    let table = scale_and_encode(targets).with_context(|| stage_failed(Stage::Scale))?;
    report.final_rows = table.rows.len();

    Ok((table, report))
}

/// Writes the table, both transforms and the report, all or nothing.
pub fn write_outputs(dir: &Path, table: &ProcessedTable, report: &PipelineReport) -> Result<()> {
    let mut out = StagedOutput::new(dir)?;
    out.stage_table(PROCESSED_FILE, &table.rows)?;
    out.stage_json(SCALER_FILE, &table.scaler)?;
    out.stage_json(ENCODER_FILE, &table.encoder)?;
    out.stage_json(REPORT_FILE, report)?;
    out.commit()
}

/// Loads `input`, runs the pipeline and commits outputs into `output_dir`.
#[tracing::instrument(skip(config), fields(input = %input.display(), output_dir = %output_dir.display()))]
pub fn process_file(
    input: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    let raw = read_sessions(input).with_context(|| stage_failed(Stage::Load))?;
    let (table, report) = run(raw, config)?;
    write_outputs(output_dir, &table, &report).with_context(|| stage_failed(Stage::Write))?;

    info!(
        rows = report.final_rows,
        stations = table.encoder.len(),
        "Processing complete"
    );
    Ok(report)
}
