// In: src/transforms/scale.rs

//! Column standardization (zero mean, unit variance).

use serde::{Deserialize, Serialize};

use crate::error::CarouselError;
use crate::table::{to_f64_opts, Expr, LogicalTable};

/// Per-column mean and standard deviation, fit once and reapplied so that
/// training-time and serving-time inputs land on the same scale.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StandardScaler {
    pub stats: Vec<(String, f64, f64)>,
}

impl StandardScaler {
    /// Computes population mean and std per feature. Nulls are excluded from
    /// the statistics. A zero std (constant column) is stored as 1.0 so the
    /// transform maps the column to all zeros instead of dividing by zero.
    pub fn fit(data: &LogicalTable, features: &[String]) -> Result<Self, CarouselError> {
        let mut stats = Vec::with_capacity(features.len());
        for feature in features {
            let values = to_f64_opts(&data.evaluate(feature)?)?;
            let mut n = 0usize;
            let mut sum = 0.0f64;
            let mut sumsq = 0.0f64;
            for v in values.into_iter().flatten() {
                n += 1;
                sum += v;
                sumsq += v * v;
            }
            let (mean, std) = if n == 0 {
                (0.0, 1.0)
            } else {
                let mean = sum / n as f64;
                let var = (sumsq / n as f64 - mean * mean).max(0.0);
                let std = var.sqrt();
                (mean, if std == 0.0 { 1.0 } else { std })
            };
            stats.push((feature.clone(), mean, std));
        }
        Ok(StandardScaler { stats })
    }

    /// Replaces each feature column with `(x - mean) / std`, materialized.
    pub fn transform(&self, data: &LogicalTable) -> Result<LogicalTable, CarouselError> {
        let mut df = data.clone();
        for (feature, mean, std) in &self.stats {
            df = df.with_eval_column(
                feature,
                &Expr::Standardize {
                    input: Box::new(Expr::col(feature.clone())),
                    mean: *mean,
                    std: *std,
                },
            )?;
        }
        Ok(df)
    }
}

/// Standardizes the listed columns in place, skipping any exact names in
/// `exclude`; fits a new scaler when none is given. Returns the table
/// together with the fitted scaler.
pub fn scale(
    data: &LogicalTable,
    cols: &[String],
    exclude: &[String],
    scaler: Option<StandardScaler>,
) -> Result<(LogicalTable, StandardScaler), CarouselError> {
    let selected: Vec<String> = cols
        .iter()
        .filter(|c| !exclude.contains(c))
        .cloned()
        .collect();
    let scaler = match scaler {
        Some(s) => s,
        None => StandardScaler::fit(data, &selected)?,
    };
    let df = scaler.transform(data)?;
    Ok((df, scaler))
}
