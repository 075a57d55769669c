//! Fitted transforms persisted next to the processed table.
//!
//! Both are fit once over the full processed table and are read-only after
//! that: any consumer scaling new raw input or inverting a prediction must go
//! through the persisted instances, never a refit.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

/// Per-column min-max scaler mapping the fitted range onto `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    /// Column names in fit order.
    pub columns: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    /// Fits column bounds over `rows`, each holding one value per column.
    ///
    /// # Errors
    ///
    /// Fails on an empty input, a row of the wrong width, or a non-finite value.
    pub fn fit<R: AsRef<[f64]>>(columns: &[&str], rows: &[R]) -> Result<Self> {
        ensure!(!rows.is_empty(), "cannot fit a scaler on zero rows");

        let mut data_min = vec![f64::INFINITY; columns.len()];
        let mut data_max = vec![f64::NEG_INFINITY; columns.len()];

        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != columns.len() {
                bail!("row {i} has {} values, expected {}", row.len(), columns.len());
            }
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() {
                    bail!("non-finite value in column '{}' at row {i}", columns[j]);
                }
                data_min[j] = data_min[j].min(v);
                data_max[j] = data_max[j].max(v);
            }
        }

        Ok(Self {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            data_min,
            data_max,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Fitted range of column `j`; a constant column uses 1 so it maps to 0.
    fn range(&self, j: usize) -> f64 {
        let range = self.data_max[j] - self.data_min[j];
        if range == 0.0 { 1.0 } else { range }
    }

    pub fn transform_value(&self, j: usize, value: f64) -> f64 {
        (value - self.data_min[j]) / self.range(j)
    }

    pub fn inverse_value(&self, j: usize, scaled: f64) -> f64 {
        scaled * self.range(j) + self.data_min[j]
    }

    /// Scales one value by column name.
    pub fn transform_named(&self, name: &str, value: f64) -> Result<f64> {
        let j = self
            .column_index(name)
            .with_context(|| format!("scaler has no column '{name}'"))?;
        Ok(self.transform_value(j, value))
    }

    /// Maps one scaled value back to physical units by column name.
    pub fn inverse_named(&self, name: &str, scaled: f64) -> Result<f64> {
        let j = self
            .column_index(name)
            .with_context(|| format!("scaler has no column '{name}'"))?;
        Ok(self.inverse_value(j, scaled))
    }

    pub fn transform_row(&self, row: &mut [f64]) {
        for (j, v) in row.iter_mut().enumerate().take(self.columns.len()) {
            *v = self.transform_value(j, *v);
        }
    }

    pub fn inverse_row(&self, row: &mut [f64]) {
        for (j, v) in row.iter_mut().enumerate().take(self.columns.len()) {
            *v = self.inverse_value(j, *v);
        }
    }
}

/// Station name to integer code, assigned in lexicographic name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEncoder {
    /// Index is the code.
    pub classes: Vec<String>,
}

impl StationEncoder {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Self {
        let classes: BTreeSet<&str> = names.into_iter().collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn encode(&self, name: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(name))
            .ok()
            .map(|i| i as u32)
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
