// In: src/pipelines/ranking.rs

//! The per-segment offer-ranking feature pipeline.
//!
//! Events are restricted to currently valid offers, tagged with the user's
//! segment, reweighted with a time decay, then split into one table per
//! segment where each row carries the event's weighted contribution to its
//! offer indicator.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute;
use chrono::NaiveDate;
use hashbrown::HashMap;
use log::{debug, info};

use crate::config::{EventWeights, RankingConfig};
use crate::error::CarouselError;
use crate::table::{CmpOp, Expr, LogicalTable, Predicate};
use crate::transforms::groupby::{group_by_aggregate, AggFunc, Aggregation};
use crate::transforms::one_hot_encode;
use crate::types::Cell;

use super::RankingModel;
use super::segmentation::{TIMESTAMP_COLUMN, WEIGHT_COLUMN};

/// Segment label attached to events from users the clustering never saw.
pub const UNSEGMENTED_LABEL: &str = "null";

/// Sentinel offer id excluded from eligibility.
const OFFER_ID_SENTINEL: i64 = -1;

/// Unknown event types carry no ranking weight.
const DEFAULT_WEIGHT: f64 = 0.0;

//==================================================================================
// 1. Offer Eligibility
//==================================================================================

/// Offer ids currently worth ranking: capping type 3 is excluded outright,
/// ids must be present and non-sentinel, and the offer must end strictly
/// after the refresh date.
pub fn eligible_offer_set(
    offers: &LogicalTable,
    refresh: NaiveDate,
) -> Result<Vec<String>, CarouselError> {
    let pred = Predicate::Cmp {
        column: "offercappingtypeid".into(),
        op: CmpOp::Ne,
        value: Cell::Int(3),
    }
    .and(Predicate::NotNull {
        column: "offerid".into(),
    })
    .and(Predicate::Cmp {
        column: "offerid".into(),
        op: CmpOp::Ne,
        value: Cell::Int(OFFER_ID_SENTINEL),
    })
    .and(Predicate::Cmp {
        column: "enddate".into(),
        op: CmpOp::Gt,
        value: Cell::Date(refresh),
    });
    let valid = offers.filter(&pred)?;
    let ids = valid.distinct_rendered("offerid")?;
    info!("{} offers eligible at refresh {}", ids.len(), refresh);
    Ok(ids)
}

//==================================================================================
// 2. Feature Tables
//==================================================================================

/// Builds one feature table per segment: eligible-offer events only, offer
/// id one-hot encoded, every indicator multiplied by the decayed event-type
/// weight, working columns dropped.
pub fn ranking_features(
    events: &LogicalTable,
    offers: &LogicalTable,
    segments: &HashMap<String, String>,
    weights: &EventWeights,
    config: &RankingConfig,
    refresh: NaiveDate,
) -> Result<HashMap<String, LogicalTable>, CarouselError> {
    let eligible = eligible_offer_set(offers, refresh)?;
    let df = events.filter(&Predicate::IsIn {
        column: "offerid".into(),
        values: eligible.iter().map(|id| Cell::Str(id.clone())).collect(),
    })?;

    let df = df.set_virtual(
        "segment",
        Expr::StrLookup {
            input: Box::new(Expr::col("uid")),
            mapping: Arc::new(segments.clone()),
            default: UNSEGMENTED_LABEL.to_string(),
        },
    );
    let df = df.set_virtual(
        WEIGHT_COLUMN,
        Expr::WeightLookup {
            input: Box::new(Expr::col("event_type")),
            weights: Arc::new(weights.0.clone()),
            default: DEFAULT_WEIGHT,
        },
    );
    let df = df.with_eval_column(
        WEIGHT_COLUMN,
        &Expr::Decay {
            weight: Box::new(Expr::col(WEIGHT_COLUMN)),
            timestamp: Box::new(Expr::col(TIMESTAMP_COLUMN)),
            impact: config.rescale.impact,
            shift: config.rescale.shift,
        },
    )?;
    let df = df.select_columns(&config.leave_columns)?;

    let mut out = HashMap::new();
    for label in df.distinct_rendered("segment")? {
        let part = df
            .filter(&Predicate::eq("segment", Cell::Str(label.clone())))?
            .compact()?;
        debug!(
            "Segment '{}': {} eligible events",
            label,
            part.num_rows()?
        );
        out.insert(label, segment_features(&part, config)?);
    }
    Ok(out)
}

/// One segment's table: offer-id indicators scaled by the event weight.
/// Every surviving event row must carry exactly one offer id; a null here
/// means the eligibility filter upstream was bypassed.
fn segment_features(
    part: &LogicalTable,
    config: &RankingConfig,
) -> Result<LogicalTable, CarouselError> {
    let offer_nulls = part
        .predicate_mask(&Predicate::Not(Box::new(Predicate::NotNull {
            column: "offerid".into(),
        })))?
        .into_iter()
        .filter(|b| *b)
        .count();
    debug_assert_eq!(offer_nulls, 0);
    if offer_nulls > 0 {
        return Err(CarouselError::InternalError(format!(
            "{} event rows carry no offer id after the eligibility filter",
            offer_nulls
        )));
    }

    let (mut df, enc) = one_hot_encode(part, &["offerid".into()], None, false, true)?;
    for col in enc.output_columns() {
        df = df.with_eval_column(
            &col,
            &Expr::Mul(
                Box::new(Expr::col(col.clone())),
                Box::new(Expr::col(WEIGHT_COLUMN)),
            ),
        )?;
    }
    Ok(df.drop_columns(&config.drop))
}

//==================================================================================
// 3. Rank Preparation & Scoring
//==================================================================================

/// Collapses a segment table to one row per user (summed offer activations,
/// clipped to the configured bounds) and drops users whose activations are
/// all zero.
pub fn rank_prepare(
    part: &LogicalTable,
    by: &str,
    config: &RankingConfig,
) -> Result<LogicalTable, CarouselError> {
    let offer_cols: Vec<String> = part
        .column_names()
        .into_iter()
        .filter(|c| c != by)
        .collect();
    let aggs: Vec<Aggregation> = offer_cols
        .iter()
        .map(|c| Aggregation::new(AggFunc::Sum, c, c))
        .collect();
    let grouped = group_by_aggregate(part, by, &aggs, Some(&Cell::Float(0.0)))?;

    let (lo, hi) = config.clip;
    let rows = grouped.num_rows()?;
    let mut keep = vec![false; rows];
    let mut clipped = grouped.clone();
    for col in &offer_cols {
        let values = crate::table::to_f64_opts(&grouped.evaluate(col)?)?;
        let bounded: Vec<f64> = values
            .iter()
            .map(|v| v.unwrap_or(0.0).clamp(lo, hi))
            .collect();
        for (i, v) in bounded.iter().enumerate() {
            if *v != 0.0 {
                keep[i] = true;
            }
        }
        let array: ArrayRef = Arc::new(arrow::array::Float64Array::from(bounded));
        clipped = clipped.with_materialized(col, array)?;
    }

    // Drop all-zero users by filtering every column through the keep mask.
    let mask = BooleanArray::from(keep);
    let mut columns = Vec::with_capacity(offer_cols.len() + 1);
    for name in clipped.column_names() {
        let filtered = compute::filter(clipped.evaluate(&name)?.as_ref(), &mask)?;
        columns.push((name, filtered));
    }
    LogicalTable::from_columns(columns)
}

/// Scores every segment table and returns, per segment, the offers sorted by
/// descending mean affinity.
pub fn rank_offers(
    parts: &HashMap<String, LogicalTable>,
    by: &str,
    config: &RankingConfig,
    model: &dyn RankingModel,
) -> Result<HashMap<String, Vec<(String, f64)>>, CarouselError> {
    let mut out = HashMap::with_capacity(parts.len());
    for (label, part) in parts {
        let prepared = rank_prepare(part, by, config)?;
        let offer_cols: Vec<String> = prepared
            .column_names()
            .into_iter()
            .filter(|c| c != by)
            .collect();
        let matrix = prepared.drop_columns(&[by.to_string()]).to_matrix()?;
        let scores = model.score(&matrix)?;
        if scores.shape() != matrix.shape() {
            return Err(CarouselError::InternalError(format!(
                "Ranking model returned shape {:?} for input {:?}",
                scores.shape(),
                matrix.shape()
            )));
        }
        let mut ranked: Vec<(String, f64)> = offer_cols
            .iter()
            .enumerate()
            .map(|(j, col)| {
                let mean = if scores.nrows() == 0 {
                    0.0
                } else {
                    scores.column(j).sum() / scores.nrows() as f64
                };
                (col.clone(), mean)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out.insert(label.clone(), ranked);
    }
    Ok(out)
}
