//! Explicitly passed service state with load-once artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use tokio::sync::OnceCell;
use tracing::info;

use super::forecaster::{Forecaster, PersistenceForecaster};
use crate::output::{ENCODER_FILE, PROCESSED_FILE, SCALER_FILE};
use crate::table::{INPUT_FEATURES, ProcessedRow, WEEKEND_FEATURE, read_rows};
use crate::transform::{MinMaxScaler, StationEncoder};
use crate::windows::station_series;

/// Everything loaded from the artifacts directory. Read-only once built.
pub struct Artifacts {
    pub scaler: MinMaxScaler,
    pub encoder: StationEncoder,
    pub rows: Vec<ProcessedRow>,
    pub forecaster: Arc<dyn Forecaster>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

impl Artifacts {
    /// Loads the scaler, encoder and processed table from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let scaler: MinMaxScaler = read_json(&dir.join(SCALER_FILE))?;
        let encoder: StationEncoder = read_json(&dir.join(ENCODER_FILE))?;
        let rows = read_rows(&dir.join(PROCESSED_FILE))?;
        let forecaster = Arc::new(PersistenceForecaster::new(scaler.clone())?);

        info!(
            rows = rows.len(),
            stations = encoder.len(),
            model = forecaster.version(),
            "Artifacts loaded"
        );
        Ok(Self {
            scaler,
            encoder,
            rows,
            forecaster,
        })
    }

    /// Scales raw 8-feature rows exactly as the pipeline scaled the training
    /// table. The weekend flag passes through unchanged.
    pub fn scale_raw(&self, window: &[[f64; 8]]) -> Result<Vec<[f64; 8]>> {
        window
            .iter()
            .map(|raw| {
                let mut scaled = *raw;
                for (j, name) in INPUT_FEATURES.iter().enumerate() {
                    if j != WEEKEND_FEATURE {
                        scaled[j] = self.scaler.transform_named(name, raw[j])?;
                    }
                }
                Ok(scaled)
            })
            .collect()
    }

    /// A `seq_length`-row window from the processed table.
    ///
    /// Defaults to the first station and its most recent window.
    pub fn sample(
        &self,
        station: Option<&str>,
        offset: Option<usize>,
        seq_length: usize,
    ) -> Result<(String, Vec<[f64; 8]>)> {
        let series = station_series(&self.rows);
        let (name, rows) = match station {
            Some(name) => series
                .get_key_value(name)
                .with_context(|| format!("unknown station '{name}'"))?,
            None => series.first_key_value().context("processed table is empty")?,
        };
        ensure!(
            rows.len() >= seq_length,
            "station '{name}' has {} rows, fewer than {seq_length}",
            rows.len()
        );

        let latest = rows.len() - seq_length;
        let start = offset.unwrap_or(latest);
        ensure!(start <= latest, "offset {start} past the last window start {latest}");

        let features = rows[start..start + seq_length]
            .iter()
            .map(|r| r.input_features())
            .collect();
        Ok(((*name).to_string(), features))
    }
}

/// State shared by all request handlers.
pub struct ServiceContext {
    artifacts_dir: PathBuf,
    seq_length: usize,
    artifacts: OnceCell<Artifacts>,
}

impl ServiceContext {
    pub fn new(artifacts_dir: impl Into<PathBuf>, seq_length: usize) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            seq_length,
            artifacts: OnceCell::new(),
        }
    }

    /// Context around already loaded artifacts.
    pub fn with_artifacts(artifacts: Artifacts, seq_length: usize) -> Self {
        Self {
            artifacts_dir: PathBuf::new(),
            seq_length,
            artifacts: OnceCell::new_with(Some(artifacts)),
        }
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    pub fn is_loaded(&self) -> bool {
        self.artifacts.initialized()
    }

    /// Returns the artifacts, loading them on first use.
    ///
    /// Concurrent first callers wait on a single load. A failed load leaves
    /// the cell empty so a later call retries.
    pub async fn artifacts(&self) -> Result<&Artifacts> {
        self.artifacts
            .get_or_try_init(|| async {
                let dir = self.artifacts_dir.clone();
                tokio::task::spawn_blocking(move || Artifacts::load(&dir))
                    .await
                    .context("artifact loader task failed")?
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::table::SCALED_COLUMNS;
    use approx::assert_relative_eq;
    use chrono::TimeDelta;

    pub(crate) fn artifacts(rows_per_station: usize) -> Artifacts {
        let scaler = MinMaxScaler::fit(
            &SCALED_COLUMNS,
            &[[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], [2.0, 4.0, 4.0, 4.0, 23.0, 6.0, 12.0]],
        )
        .unwrap();
        let start = crate::session::parse_timestamp("2020-01-01 00:00").unwrap();
        let rows = ["A", "B"]
            .iter()
            .enumerate()
            .flat_map(|(code, station)| {
                (0..rows_per_station).map(move |i| ProcessedRow {
                    timestamp: start + TimeDelta::minutes(15 * i as i64),
                    station_name: (*station).to_string(),
                    station_id_encoded: code as u32,
                    available_ports: 0.5,
                    energy_kwh: i as f64 / 100.0,
                    hour: 0.0,
                    day_of_week: 0.5,
                    month: 0.0,
                    is_weekend: 0,
                    energy_roll_3: 0.0,
                    energy_roll_6: 0.0,
                    future_energy: 0.0,
                    future_available_ports: 1,
                })
            })
            .collect();
        Artifacts {
            forecaster: Arc::new(PersistenceForecaster::new(scaler.clone()).unwrap()),
            scaler,
            encoder: StationEncoder::fit(["A", "B"]),
            rows,
        }
    }

    #[test]
    fn test_scale_raw_matches_training_convention() {
        let a = artifacts(4);
        let raw = [[1.0, 2.0, 23.0, 3.0, 12.0, 1.0, 4.0, 0.0]];
        let scaled = a.scale_raw(&raw).unwrap();

        assert_relative_eq!(scaled[0][0], 0.5);
        assert_relative_eq!(scaled[0][1], 0.5);
        assert_relative_eq!(scaled[0][2], 1.0);
        assert_relative_eq!(scaled[0][3], 0.5);
        assert_relative_eq!(scaled[0][4], 1.0);
        assert_eq!(scaled[0][5], 1.0);
        assert_relative_eq!(scaled[0][6], 1.0);
        assert_relative_eq!(scaled[0][7], 0.0);
    }

    #[test]
    fn test_sample_defaults_to_latest_window_of_first_station() {
        let a = artifacts(10);
        let (station, window) = a.sample(None, None, 4).unwrap();

        assert_eq!(station, "A");
        assert_eq!(window.len(), 4);
        assert_relative_eq!(window[0][1], 0.06);
        assert_relative_eq!(window[3][1], 0.09);
    }

    #[test]
    fn test_sample_by_station_and_offset() {
        let a = artifacts(10);
        let (station, window) = a.sample(Some("B"), Some(0), 3).unwrap();
        assert_eq!(station, "B");
        assert_relative_eq!(window[2][1], 0.02);

        assert!(a.sample(Some("B"), Some(8), 3).is_err());
        assert!(a.sample(Some("Z"), None, 3).is_err());
        assert!(a.sample(None, None, 11).is_err());
    }

    #[tokio::test]
    async fn test_preloaded_context() {
        let ctx = ServiceContext::with_artifacts(artifacts(2), 48);
        assert!(ctx.is_loaded());
        assert_eq!(ctx.artifacts().await.unwrap().rows.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_load_can_retry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ServiceContext::new(dir.path(), 48);

        assert!(ctx.artifacts().await.is_err());
        assert!(!ctx.is_loaded());
    }
}
