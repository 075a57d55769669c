//! Gradient × input attribution for any [`Forecaster`].
//!
//! The gradient of the energy prediction with respect to each input cell is
//! estimated by central finite differences, so the forecaster needs no
//! autodiff support.

use anyhow::{Result, ensure};
use serde::Serialize;

use super::forecaster::Forecaster;
use crate::table::INPUT_FEATURES;

/// Perturbation applied to each scaled input cell.
pub const DEFAULT_STEP: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    /// One row per timestep, one column per input feature.
    pub attributions: Vec<[f64; 8]>,
    pub feature_names: Vec<String>,
}

impl Attribution {
    /// Total absolute attribution per feature across timesteps.
    pub fn feature_importance(&self) -> [f64; 8] {
        let mut totals = [0.0; 8];
        for row in &self.attributions {
            for (t, v) in totals.iter_mut().zip(row) {
                *t += v.abs();
            }
        }
        totals
    }
}

/// Attributes the energy forecast of `window` to its input cells.
pub fn gradient_times_input(
    model: &dyn Forecaster,
    window: &[[f64; 8]],
    step: f64,
) -> Result<Attribution> {
    ensure!(step > 0.0, "finite-difference step must be positive");

    let mut probe = window.to_vec();
    let mut attributions = vec![[0.0; 8]; window.len()];

    for t in 0..window.len() {
        for f in 0..8 {
            let x = window[t][f];

            probe[t][f] = x + step;
            let up = model.predict(&probe)?.predicted_energy;
            probe[t][f] = x - step;
            let down = model.predict(&probe)?.predicted_energy;
            probe[t][f] = x;

            attributions[t][f] = (up - down) / (2.0 * step) * x;
        }
    }

    Ok(Attribution {
        attributions,
        feature_names: INPUT_FEATURES.iter().map(|s| (*s).to_string()).collect(),
    })
}
