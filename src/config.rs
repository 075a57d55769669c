//! Tunables for the reconstruction pipeline.

use chrono::TimeDelta;

/// Knobs shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Grid cadence in minutes.
    pub interval_minutes: u32,
    /// Charging time assumed when both duration columns are zero.
    pub fallback_charge_minutes: f64,
    /// Worker threads for the per-station simulation; `None` lets rayon decide.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            fallback_charge_minutes: 15.0,
            threads: None,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.interval_minutes))
    }

    /// Length of one grid slot in hours, the factor between load (kW) and interval energy (kWh).
    pub fn interval_hours(&self) -> f64 {
        f64::from(self.interval_minutes) / 60.0
    }
}
