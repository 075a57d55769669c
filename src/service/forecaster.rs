//! Forecasting seam and the persistence baseline behind it.

use anyhow::{Context, Result, ensure};
use serde::Serialize;

use crate::table::INPUT_FEATURES;
use crate::transform::MinMaxScaler;

/// One-step-ahead prediction for a station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    /// Next-interval energy in kWh.
    pub predicted_energy: f64,
    /// Most likely number of available ports next interval.
    pub predicted_ports_class: u32,
    /// Probability per available-ports class, index = port count.
    pub predicted_ports_probs: Vec<f64>,
}

/// Anything that maps a scaled feature window to a [`Forecast`].
///
/// Rows carry the features in [`INPUT_FEATURES`] order, already scaled.
pub trait Forecaster: Send + Sync {
    fn predict(&self, window: &[[f64; 8]]) -> Result<Forecast>;

    fn version(&self) -> &str;
}

/// Baseline that repeats the last observed interval.
pub struct PersistenceForecaster {
    scaler: MinMaxScaler,
    energy: usize,
    ports: usize,
    num_classes: usize,
}

impl PersistenceForecaster {
    /// Builds the baseline from the fitted scaler; port classes span
    /// `0..=max available ports` seen during fitting.
    pub fn new(scaler: MinMaxScaler) -> Result<Self> {
        let energy = scaler
            .column_index(INPUT_FEATURES[1])
            .context("scaler lacks the energy column")?;
        let ports = scaler
            .column_index(INPUT_FEATURES[0])
            .context("scaler lacks the available ports column")?;
        let num_classes = scaler.data_max[ports].max(0.0).round() as usize + 1;
        Ok(Self {
            scaler,
            energy,
            ports,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl Forecaster for PersistenceForecaster {
    fn predict(&self, window: &[[f64; 8]]) -> Result<Forecast> {
        let last = window.last().context("empty feature window")?;
        ensure!(last.iter().all(|v| v.is_finite()), "non-finite feature value");

        let predicted_energy = self.scaler.inverse_value(self.energy, last[1]).max(0.0);
        let ports = self.scaler.inverse_value(self.ports, last[0]).round();
        let class = ports.clamp(0.0, (self.num_classes - 1) as f64) as u32;

        let mut probs = vec![0.0; self.num_classes];
        probs[class as usize] = 1.0;

        Ok(Forecast {
            predicted_energy,
            predicted_ports_class: class,
            predicted_ports_probs: probs,
        })
    }

    fn version(&self) -> &str {
        "persistence-v1"
    }
}
