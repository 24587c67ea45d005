// In: src/transforms/groupby.rs

//! Single-key group-by with optionally filtered aggregations.
//!
//! This is the reduction engine behind activity histograms and per-user score
//! sums: each `Aggregation` can carry its own row predicate, so one pass over
//! the table produces many conditional aggregates (one column per day of a
//! histogram, for instance). Output tables are small and in-memory, sorted
//! ascending by the group key.

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, UInt32Array};
use arrow::compute;
use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

use crate::error::CarouselError;
use crate::table::{fill_null, to_f64_opts, to_rendered_opts, LogicalTable, Predicate};
use crate::types::Cell;

//==================================================================================
// 1. Aggregate Functions
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Std,
    Max,
    First,
}

impl AggFunc {
    pub fn parse(name: &str) -> Result<Self, CarouselError> {
        match name {
            "count" => Ok(AggFunc::Count),
            "sum" => Ok(AggFunc::Sum),
            "mean" => Ok(AggFunc::Mean),
            "std" => Ok(AggFunc::Std),
            "max" => Ok(AggFunc::Max),
            "first" => Ok(AggFunc::First),
            other => Err(CarouselError::UnknownAggregate(other.to_string())),
        }
    }
}

/// One output column of a group-by. When `filter` is set, only rows matching
/// the predicate contribute; groups with no contributing rows yield null.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Aggregation {
    pub func: AggFunc,
    /// Source column. `Count` ignores it and may leave it empty.
    #[serde(default)]
    pub source: String,
    pub output: String,
    #[serde(default)]
    pub filter: Option<Predicate>,
}

impl Aggregation {
    pub fn new(func: AggFunc, source: &str, output: &str) -> Self {
        Aggregation {
            func,
            source: source.to_string(),
            output: output.to_string(),
            filter: None,
        }
    }

    pub fn filtered(func: AggFunc, source: &str, output: &str, filter: Predicate) -> Self {
        Aggregation {
            func,
            source: source.to_string(),
            output: output.to_string(),
            filter: Some(filter),
        }
    }
}

//==================================================================================
// 2. Keys
//==================================================================================

/// Hashable, orderable group key. Integer keys sort numerically and come back
/// out as Int64; everything else goes through the canonical string rendering.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Debug)]
enum Key {
    Int(i64),
    Str(String),
}

fn key_values(array: &ArrayRef) -> Result<Vec<Option<Key>>, CarouselError> {
    match array.data_type() {
        DataType::Int64 | DataType::Int32 => {
            let floats = to_f64_opts(array)?;
            Ok(floats
                .into_iter()
                .map(|v| v.map(|f| Key::Int(f as i64)))
                .collect())
        }
        _ => {
            let rendered = to_rendered_opts(array)?;
            Ok(rendered.into_iter().map(|v| v.map(Key::Str)).collect())
        }
    }
}

//==================================================================================
// 3. The Group-By
//==================================================================================

struct Accum {
    count: i64,
    sum: f64,
    sumsq: f64,
    max: Option<f64>,
    first_row: Option<usize>,
}

impl Accum {
    fn new() -> Self {
        Accum {
            count: 0,
            sum: 0.0,
            sumsq: 0.0,
            max: None,
            first_row: None,
        }
    }
}

/// Groups the visible rows by `by` and computes every aggregation in one
/// pass per source column. Rows with a null key are skipped. Aggregates with
/// no contributing rows come out null, then filled with `fill` when given
/// (columns the fill value cannot coerce to are left untouched). The result
/// is an in-memory table with the key column first, sorted ascending.
pub fn group_by_aggregate(
    data: &LogicalTable,
    by: &str,
    aggs: &[Aggregation],
    fill: Option<&Cell>,
) -> Result<LogicalTable, CarouselError> {
    let key_array = data.evaluate(by)?;
    let keys = key_values(&key_array)?;

    // First-seen group assignment per row; sorted into key order at the end.
    let mut index: hashbrown::HashMap<Key, usize> = hashbrown::HashMap::new();
    let mut order: Vec<Key> = Vec::new();
    let mut row_group: Vec<Option<usize>> = Vec::with_capacity(keys.len());
    for key in &keys {
        row_group.push(key.as_ref().map(|k| {
            *index.entry(k.clone()).or_insert_with(|| {
                order.push(k.clone());
                order.len() - 1
            })
        }));
    }
    let n_groups = order.len();

    let mut out_arrays: Vec<(String, ArrayRef)> = Vec::with_capacity(aggs.len() + 1);

    // Key sort permutation: perm[out_pos] = first-seen group index.
    let mut perm: Vec<usize> = (0..n_groups).collect();
    perm.sort_by(|a, b| order[*a].cmp(&order[*b]));

    let sorted_keys: ArrayRef = match order.first() {
        Some(Key::Int(_)) => {
            let values: Vec<i64> = perm
                .iter()
                .map(|&g| match &order[g] {
                    Key::Int(v) => *v,
                    Key::Str(_) => 0,
                })
                .collect();
            std::sync::Arc::new(Int64Array::from(values))
        }
        _ => {
            let values: Vec<String> = perm
                .iter()
                .map(|&g| match &order[g] {
                    Key::Str(s) => s.clone(),
                    Key::Int(v) => v.to_string(),
                })
                .collect();
            std::sync::Arc::new(StringArray::from(values))
        }
    };
    out_arrays.push((by.to_string(), sorted_keys));

    for agg in aggs {
        let mask: Option<Vec<bool>> = match &agg.filter {
            Some(pred) => Some(data.predicate_mask(pred)?),
            None => None,
        };
        let source: Option<ArrayRef> = if agg.func == AggFunc::Count {
            None
        } else {
            Some(data.evaluate(&agg.source)?)
        };
        let values: Option<Vec<Option<f64>>> = match (&source, agg.func) {
            (Some(arr), f) if f != AggFunc::First => Some(to_f64_opts(arr)?),
            _ => None,
        };

        let mut accums: Vec<Accum> = (0..n_groups).map(|_| Accum::new()).collect();
        for (row, group) in row_group.iter().enumerate() {
            let Some(g) = group else { continue };
            if let Some(m) = &mask {
                if !m[row] {
                    continue;
                }
            }
            let acc = &mut accums[*g];
            if acc.first_row.is_none() {
                acc.first_row = Some(row);
            }
            match &values {
                Some(vals) => {
                    if let Some(v) = vals[row] {
                        acc.count += 1;
                        acc.sum += v;
                        acc.sumsq += v * v;
                        acc.max = Some(acc.max.map_or(v, |m| m.max(v)));
                    }
                }
                None => acc.count += 1,
            }
        }

        let column: ArrayRef = match agg.func {
            AggFunc::Count => {
                let counts: Vec<i64> = perm.iter().map(|&g| accums[g].count).collect();
                std::sync::Arc::new(Int64Array::from(counts))
            }
            AggFunc::Sum => {
                let sums: Vec<Option<f64>> = perm
                    .iter()
                    .map(|&g| (accums[g].count > 0).then(|| accums[g].sum))
                    .collect();
                std::sync::Arc::new(Float64Array::from(sums))
            }
            AggFunc::Mean => {
                let means: Vec<Option<f64>> = perm
                    .iter()
                    .map(|&g| {
                        (accums[g].count > 0)
                            .then(|| accums[g].sum / accums[g].count as f64)
                    })
                    .collect();
                std::sync::Arc::new(Float64Array::from(means))
            }
            AggFunc::Std => {
                // Population std (ddof 0), matching the feature definitions.
                let stds: Vec<Option<f64>> = perm
                    .iter()
                    .map(|&g| {
                        let acc = &accums[g];
                        (acc.count > 0).then(|| {
                            let n = acc.count as f64;
                            let mean = acc.sum / n;
                            (acc.sumsq / n - mean * mean).max(0.0).sqrt()
                        })
                    })
                    .collect();
                std::sync::Arc::new(Float64Array::from(stds))
            }
            AggFunc::Max => {
                let maxes: Vec<Option<f64>> =
                    perm.iter().map(|&g| accums[g].max).collect();
                std::sync::Arc::new(Float64Array::from(maxes))
            }
            AggFunc::First => {
                // Take preserves the source dtype; a null index yields null.
                let indices: Vec<Option<u32>> = perm
                    .iter()
                    .map(|&g| accums[g].first_row.map(|r| r as u32))
                    .collect();
                let source = source.as_ref().ok_or_else(|| {
                    CarouselError::InternalError(
                        "First aggregation without a source column".to_string(),
                    )
                })?;
                compute::take(source.as_ref(), &UInt32Array::from(indices), None)?
            }
        };
        let column = match fill {
            Some(value) => fill_null(&column, value).unwrap_or(column),
            None => column,
        };
        out_arrays.push((agg.output.clone(), column));
    }

    LogicalTable::from_columns(out_arrays)
}
