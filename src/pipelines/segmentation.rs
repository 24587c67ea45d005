// In: src/pipelines/segmentation.rs

//! The user-segmentation feature pipeline.
//!
//! Events are weighted by type, categorical attributes are one-hot encoded,
//! and each user's recent activity is summarized as a per-day histogram over
//! a rolling window. The output pairs a scaled feature matrix with a row-
//! aligned user-id list; downstream consumers rely on row i of the matrix
//! belonging to id i of the list.

use std::sync::Arc;

use hashbrown::HashMap;
use log::{debug, info};
use ndarray::Array2;

use crate::config::{EventWeights, SegmentationConfig};
use crate::error::CarouselError;
use crate::table::{Expr, LogicalTable, Predicate};
use crate::transforms::groupby::{group_by_aggregate, AggFunc, Aggregation};
use crate::transforms::{one_hot_encode, scale};
use crate::types::Cell;

use super::ClusteringModel;

/// Name of the derived per-event weight column.
pub const WEIGHT_COLUMN: &str = "event_weight";

/// Event-timestamp column: integer day distance from the refresh date.
pub const TIMESTAMP_COLUMN: &str = "event_timestamp";

/// Unknown event types count with full weight in the segmentation flow.
const DEFAULT_WEIGHT: f64 = 1.0;

//==================================================================================
// 1. Activity Features
//==================================================================================

/// Attaches the per-event weight derived from the event type.
pub fn add_event_weights(data: &LogicalTable, weights: &EventWeights) -> LogicalTable {
    data.set_virtual(
        WEIGHT_COLUMN,
        Expr::WeightLookup {
            input: Box::new(Expr::col("event_type")),
            weights: Arc::new(weights.0.clone()),
            default: DEFAULT_WEIGHT,
        },
    )
}

/// The per-day histogram entries for one tag: sum of event weight on each
/// day offset of the window, restricted to `extra` when given. The window
/// covers offsets `1..period`, exclusive of the upper bound.
fn histogram_aggs(tag: Option<&str>, period: u32, extra: Option<&Predicate>) -> Vec<Aggregation> {
    (1..period as i64)
        .map(|day| {
            let on_day = Predicate::eq(TIMESTAMP_COLUMN, Cell::Int(day));
            let pred = match extra {
                Some(extra) => on_day.and(extra.clone()),
                None => on_day,
            };
            let output = match tag {
                Some(tag) => format!("{}_day_{}", tag, day),
                None => format!("day_{}", day),
            };
            Aggregation::filtered(AggFunc::Sum, WEIGHT_COLUMN, &output, pred)
        })
        .collect()
}

/// One grouped row per user: timestamp mean/std, the base activity
/// histogram, any configured predicate-split histograms, and a sum per
/// extra column (the one-hot attribute indicators). Empty aggregates are
/// zero-filled.
pub fn activity_characteristics(
    data: &LogicalTable,
    by: &str,
    config: &SegmentationConfig,
    extra_sums: &[String],
) -> Result<LogicalTable, CarouselError> {
    let mut aggs = vec![
        Aggregation::new(AggFunc::Mean, TIMESTAMP_COLUMN, "activity_mean"),
        Aggregation::new(AggFunc::Std, TIMESTAMP_COLUMN, "activity_std"),
    ];
    aggs.extend(histogram_aggs(None, config.period, None));
    for spec in &config.histograms {
        aggs.extend(histogram_aggs(
            Some(&spec.tag),
            config.period,
            Some(&spec.predicate),
        ));
    }
    for col in extra_sums {
        aggs.push(Aggregation::new(AggFunc::Sum, col, col));
    }
    debug!(
        "Aggregating {} activity features per '{}'",
        aggs.len(),
        by
    );
    group_by_aggregate(data, by, &aggs, Some(&Cell::Float(0.0)))
}

//==================================================================================
// 2. The Pipeline
//==================================================================================

/// Full segmentation feature flow. Returns the scaled feature matrix and the
/// row-aligned user-id list.
pub fn segmentation_features(
    data: &LogicalTable,
    by: &str,
    config: &SegmentationConfig,
    weights: &EventWeights,
) -> Result<(Array2<f64>, Vec<String>), CarouselError> {
    let df = add_event_weights(data, weights);
    let (df, enc) = one_hot_encode(&df, &config.onehotenc, None, true, true)?;
    let grouped = activity_characteristics(&df, by, config, &enc.output_columns())?;

    let ids: Vec<String> = crate::table::to_rendered_opts(&grouped.evaluate(by)?)?
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect();
    let features = grouped.drop_columns(&[by.to_string()]);

    let feature_cols = features.column_names();
    let (scaled, _) = scale(&features, &feature_cols, &[], None)?;
    let matrix = scaled.to_matrix()?;
    info!(
        "Segmentation features: {} users x {} features",
        matrix.nrows(),
        matrix.ncols()
    );
    Ok((matrix, ids))
}

/// Runs the external clustering model over the feature matrix and zips each
/// user id with its predicted segment label.
pub fn segment_users(
    features: &Array2<f64>,
    ids: &[String],
    model: &dyn ClusteringModel,
) -> Result<HashMap<String, String>, CarouselError> {
    let labels = model.predict(features)?;
    if labels.len() != ids.len() {
        return Err(CarouselError::InternalError(format!(
            "Clustering model returned {} labels for {} users",
            labels.len(),
            ids.len()
        )));
    }
    Ok(ids.iter().cloned().zip(labels).collect())
}

//==================================================================================
// 3. Identity Mapping
//==================================================================================

/// First-match mapping from anonymous id to known user id, for joining
/// anonymous web events onto account-level history.
pub fn extract_uid_mapping(
    data: &LogicalTable,
    anon_col: &str,
    uid_col: &str,
) -> Result<HashMap<String, String>, CarouselError> {
    let grouped = group_by_aggregate(
        data,
        anon_col,
        &[Aggregation::new(AggFunc::First, uid_col, uid_col)],
        None,
    )?;
    let anons = crate::table::to_rendered_opts(&grouped.evaluate(anon_col)?)?;
    let uids = crate::table::to_rendered_opts(&grouped.evaluate(uid_col)?)?;
    let mut mapping = HashMap::with_capacity(anons.len());
    for (anon, uid) in anons.into_iter().zip(uids) {
        if let (Some(anon), Some(uid)) = (anon, uid) {
            mapping.insert(anon, uid);
        }
    }
    Ok(mapping)
}
