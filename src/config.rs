// In: src/config.rs

//! Configuration objects for the carousel pipeline.
//!
//! These structs are designed to be created once at the application boundary
//! (e.g. from the orchestrator's JSON/YAML parameter files via `serde_json`)
//! and then passed down through the system by reference. Validation is by
//! presence of required keys at the point of use; the orchestration layer
//! owns loading and merging.

use serde::{Deserialize, Serialize};

use crate::table::Predicate;
use crate::types::Cell;

//==================================================================================
// I. Fetch & Ingestion Configuration
//==================================================================================

/// One entry of the ordered column metadata handed to the ingestor:
/// a source column name plus an optional target dtype name
/// (absent = pass-through, no cast).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub dtype: Option<String>,
}

/// Parameters for pulling one source table through the streaming cursor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FetchConfig {
    /// Look-back window in days applied by the source query.
    pub period: i64,
    /// Optional row cap applied by the source query.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows per persisted chunk.
    #[serde(default = "default_chunksize")]
    pub chunksize: usize,
}

fn default_chunksize() -> usize {
    100_000
}

//==================================================================================
// II. Preprocessing Configuration
//==================================================================================

/// A single fillna rule: replace missing values in `columns` with `value`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FillnaRule {
    pub value: Cell,
    pub columns: Vec<String>,
}

/// Column-level preprocessing applied right after ingestion
/// (data-engineering stage).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PreprocessingConfig {
    #[serde(default)]
    pub fillna: Vec<FillnaRule>,
    #[serde(default)]
    pub force_int: Vec<String>,
    /// Columns holding date-shaped strings to normalize into real dates.
    #[serde(default)]
    pub datetime: Vec<String>,
    /// Columns replaced by their day distance from `refresh_date`.
    #[serde(default)]
    pub days_difference: Vec<String>,
}

//==================================================================================
// III. Segmentation & Ranking Configuration
//==================================================================================

/// An extra activity histogram: the per-day sums are additionally restricted
/// to rows satisfying `predicate`, and output columns are prefixed with `tag`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistogramSpec {
    pub tag: String,
    pub predicate: Predicate,
}

/// Parameters of the user-segmentation feature pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SegmentationConfig {
    /// Categorical event attributes to one-hot encode (materialized).
    #[serde(default)]
    pub onehotenc: Vec<String>,
    /// Rolling-window length in days for the activity histograms. Histogram
    /// columns cover day offsets `1..period`, exclusive of the upper bound.
    pub period: u32,
    /// Extra predicate-split histograms built in parallel to the base one.
    #[serde(default)]
    pub histograms: Vec<HistogramSpec>,
}

/// Time-decay parameters: event weight is divided by
/// `1.0001 + timestamp^impact` once `timestamp > shift`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RescaleConfig {
    pub impact: f64,
    pub shift: f64,
}

/// Parameters of the per-segment event/offer ranking feature pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RankingConfig {
    /// Column subset the ranking tables are restricted to before splitting.
    pub leave_columns: Vec<String>,
    /// Offer identifier columns to one-hot encode within each segment.
    pub onehotenc: Vec<String>,
    /// Working columns dropped from each finished segment table.
    #[serde(default)]
    pub drop: Vec<String>,
    pub rescale: RescaleConfig,
    /// Clip bounds applied to per-user aggregated offer activations.
    #[serde(default = "default_clip")]
    pub clip: (f64, f64),
}

fn default_clip() -> (f64, f64) {
    (0.0, 37.0)
}

/// Mapping from event-type label to its numeric weight.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EventWeights(pub hashbrown::HashMap<String, f64>);

impl EventWeights {
    /// Weight of an event type, or `default` for unknown labels. The
    /// segmentation pipeline defaults to 1.0, the ranking pipeline to 0.0.
    pub fn get_or(&self, event_type: &str, default: f64) -> f64 {
        self.0.get(event_type).copied().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_defaults() {
        let conf: FetchConfig = serde_json::from_str(r#"{"period": 90}"#).unwrap();
        assert_eq!(conf.chunksize, 100_000);
        assert_eq!(conf.limit, None);
    }

    #[test]
    fn test_fillna_rule_scalar_values() {
        let rule: FillnaRule =
            serde_json::from_str(r#"{"value": 0.0, "columns": ["amount"]}"#).unwrap();
        assert_eq!(rule.value, Cell::Float(0.0));
    }

    #[test]
    fn test_event_weights_lookup() {
        let mut weights = EventWeights::default();
        weights.0.insert("purchase".into(), 5.0);
        assert_eq!(weights.get_or("purchase", 1.0), 5.0);
        assert_eq!(weights.get_or("scroll", 1.0), 1.0);
    }
}
