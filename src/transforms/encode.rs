// In: src/transforms/encode.rs

//! Fitted encoder state as explicit value objects.
//!
//! Encoders are fit once on a reference table and then reusable to transform
//! other tables consistently; callers thread them between the
//! fit-on-training-data and apply-on-new-data calls. There is no implicit
//! global registry; schema stability across train/apply splits comes from
//! reusing the same encoder value.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CarouselError;
use crate::table::{Expr, LogicalTable};
use crate::types::Cell;

/// Sentinel code for values a `LabelEncoder` never saw during fit.
pub const UNSEEN_LABEL: i64 = -1;

/// Sorts a category vocabulary: numerically when every category renders as
/// an integer (offer ids), lexicographically otherwise.
fn sort_categories(mut cats: Vec<String>) -> Vec<String> {
    if cats.iter().all(|c| c.parse::<i64>().is_ok()) {
        cats.sort_by_key(|c| c.parse::<i64>().unwrap_or(i64::MAX));
    } else {
        cats.sort();
    }
    cats
}

//==================================================================================
// 1. One-Hot
//==================================================================================

/// Vocabulary of distinct values per source column; transform adds one
/// indicator column per observed category (`{feature}_{value}`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OneHotEncoder {
    pub vocab: Vec<(String, Vec<String>)>,
}

impl OneHotEncoder {
    pub fn fit(data: &LogicalTable, features: &[String]) -> Result<Self, CarouselError> {
        let mut vocab = Vec::with_capacity(features.len());
        for feature in features {
            vocab.push((
                feature.clone(),
                sort_categories(data.distinct_rendered(feature)?),
            ));
        }
        Ok(OneHotEncoder { vocab })
    }

    /// Names of the indicator columns this encoder produces, in order.
    pub fn output_columns(&self) -> Vec<String> {
        self.vocab
            .iter()
            .flat_map(|(feature, cats)| {
                cats.iter().map(move |c| format!("{}_{}", feature, c))
            })
            .collect()
    }

    /// Adds the indicator columns as pending (virtual) expressions.
    pub fn transform(&self, data: &LogicalTable) -> LogicalTable {
        let mut df = data.clone();
        for (feature, cats) in &self.vocab {
            for cat in cats {
                df = df.set_virtual(
                    &format!("{}_{}", feature, cat),
                    Expr::Indicator {
                        input: Box::new(Expr::col(feature.clone())),
                        category: Cell::Str(cat.clone()),
                    },
                );
            }
        }
        df
    }
}

/// One-hot encodes the listed columns. With no encoder supplied, a new one
/// is fit on this table. Optionally drops the source columns and forces
/// materialization of the new indicator columns. Returns the table together
/// with the (possibly newly fitted) encoder.
pub fn one_hot_encode(
    data: &LogicalTable,
    cols: &[String],
    enc: Option<OneHotEncoder>,
    materialize: bool,
    drop_source: bool,
) -> Result<(LogicalTable, OneHotEncoder), CarouselError> {
    let enc = match enc {
        Some(enc) => enc,
        None => OneHotEncoder::fit(data, cols)?,
    };
    let mut df = enc.transform(data);
    if drop_source {
        df = df.drop_columns(cols);
    }
    if materialize {
        df = df.materialize(&enc.output_columns())?;
    }
    Ok((df, enc))
}

//==================================================================================
// 2. Multi-Hot
//==================================================================================

/// Like one-hot, but source cells are comma-separated token sets and several
/// indicators may be set to 1 per row.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MultiHotEncoder {
    pub vocab: Vec<(String, Vec<String>)>,
}

impl MultiHotEncoder {
    pub fn fit(data: &LogicalTable, features: &[String]) -> Result<Self, CarouselError> {
        let mut vocab = Vec::with_capacity(features.len());
        for feature in features {
            let mut tokens = std::collections::BTreeSet::new();
            let values = crate::table::to_rendered_opts(&data.evaluate(feature)?)?;
            for value in values.into_iter().flatten() {
                for token in value.split(',') {
                    let token = token.trim();
                    if !token.is_empty() {
                        tokens.insert(token.to_string());
                    }
                }
            }
            vocab.push((
                feature.clone(),
                sort_categories(tokens.into_iter().collect()),
            ));
        }
        Ok(MultiHotEncoder { vocab })
    }

    pub fn output_columns(&self) -> Vec<String> {
        self.vocab
            .iter()
            .flat_map(|(feature, toks)| {
                toks.iter().map(move |t| format!("{}_{}", feature, t))
            })
            .collect()
    }

    pub fn transform(&self, data: &LogicalTable) -> LogicalTable {
        let mut df = data.clone();
        for (feature, toks) in &self.vocab {
            for token in toks {
                df = df.set_virtual(
                    &format!("{}_{}", feature, token),
                    Expr::TokenIndicator {
                        input: Box::new(Expr::col(feature.clone())),
                        token: token.clone(),
                    },
                );
            }
        }
        df
    }
}

/// Multi-hot encodes the listed columns; same contract as `one_hot_encode`.
pub fn multi_hot_encode(
    data: &LogicalTable,
    cols: &[String],
    enc: Option<MultiHotEncoder>,
    materialize: bool,
    drop_source: bool,
) -> Result<(LogicalTable, MultiHotEncoder), CarouselError> {
    let enc = match enc {
        Some(enc) => enc,
        None => MultiHotEncoder::fit(data, cols)?,
    };
    let mut df = enc.transform(data);
    if drop_source {
        df = df.drop_columns(cols);
    }
    if materialize {
        df = df.materialize(&enc.output_columns())?;
    }
    Ok((df, enc))
}

//==================================================================================
// 3. Label
//==================================================================================

/// Maps each distinct value of each feature to a stable integer code.
/// Unseen values encountered at apply time map to `UNSEEN_LABEL`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LabelEncoder {
    pub codes: Vec<(String, HashMap<String, i64>)>,
}

impl LabelEncoder {
    pub fn fit(data: &LogicalTable, features: &[String]) -> Result<Self, CarouselError> {
        let mut codes = Vec::with_capacity(features.len());
        for feature in features {
            let cats = sort_categories(data.distinct_rendered(feature)?);
            let map: HashMap<String, i64> = cats
                .into_iter()
                .enumerate()
                .map(|(i, c)| (c, i as i64))
                .collect();
            codes.push((feature.clone(), map));
        }
        Ok(LabelEncoder { codes })
    }

    /// The fitted code table for one feature.
    pub fn labels(&self, feature: &str) -> Option<&HashMap<String, i64>> {
        self.codes
            .iter()
            .find(|(f, _)| f == feature)
            .map(|(_, m)| m)
    }

    /// Replaces each feature column with its integer codes, materialized.
    pub fn transform(&self, data: &LogicalTable) -> Result<LogicalTable, CarouselError> {
        let mut df = data.clone();
        for (feature, map) in &self.codes {
            df = df.with_eval_column(
                feature,
                &Expr::LabelCode {
                    input: Box::new(Expr::col(feature.clone())),
                    codes: Arc::new(map.clone()),
                    unseen: UNSEEN_LABEL,
                },
            )?;
        }
        Ok(df)
    }
}

/// Label-encodes the listed columns in place; fits a new encoder when none
/// is given.
pub fn label_encode(
    data: &LogicalTable,
    cols: &[String],
    enc: Option<LabelEncoder>,
) -> Result<(LogicalTable, LabelEncoder), CarouselError> {
    let enc = match enc {
        Some(enc) => enc,
        None => LabelEncoder::fit(data, cols)?,
    };
    let df = enc.transform(data)?;
    Ok((df, enc))
}
