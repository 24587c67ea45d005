// In: src/table/eval.rs

//! The column evaluator: the only place where virtual expressions and
//! predicates actually touch data. Everything upstream of this module
//! composes plans; everything here executes them whole-column at a time,
//! so peak memory stays bounded by one column rather than one table.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray,
};
use arrow::compute;
use arrow_schema::DataType as ArrowDataType;
use chrono::NaiveDate;
use regex::Regex;

use crate::error::CarouselError;
use crate::table::expr::{CmpOp, Expr, Predicate};
use crate::types::value::{date_to_days, days_to_date};
use crate::types::{CarouselDataType, Cell};

//==================================================================================
// 1. Resolver Contract
//==================================================================================

/// Supplies leaf columns to the evaluator. The logical table provides two
/// implementations: one resolving against base rows (for building filter
/// masks) and one resolving post-selection rows (for derived columns).
pub(crate) trait ColumnResolver {
    fn resolve(&self, name: &str) -> Result<ArrayRef, CarouselError>;
    fn num_rows(&self) -> Result<usize, CarouselError>;
}

//==================================================================================
// 2. Expression Evaluation
//==================================================================================

pub(crate) fn eval_expr(
    expr: &Expr,
    resolver: &dyn ColumnResolver,
) -> Result<ArrayRef, CarouselError> {
    match expr {
        Expr::Column(name) => resolver.resolve(name),
        Expr::Literal(cell) => broadcast_literal(cell, resolver.num_rows()?),
        Expr::FillNull(inner, value) => {
            let array = eval_expr(inner, resolver)?;
            fill_null(&array, value)
        }
        Expr::Cast(inner, dtype) => {
            let array = eval_expr(inner, resolver)?;
            Ok(compute::cast(&array, &dtype.to_arrow_type())?)
        }
        Expr::ExtractDate { input, pattern } => {
            let array = eval_expr(input, resolver)?;
            extract_date(&array, pattern)
        }
        Expr::DaysBetween { base, value } => {
            let base = eval_expr(base, resolver)?;
            let value = eval_expr(value, resolver)?;
            days_between(&base, &value)
        }
        Expr::Add(a, b) => binary_f64(resolver, a, b, |x, y| x + y),
        Expr::Sub(a, b) => binary_f64(resolver, a, b, |x, y| x - y),
        Expr::Mul(a, b) => binary_f64(resolver, a, b, |x, y| x * y),
        Expr::Div(a, b) => binary_f64(resolver, a, b, |x, y| x / y),
        Expr::WeightLookup {
            input,
            weights,
            default,
        } => {
            let keys = to_rendered_opts(&eval_expr(input, resolver)?)?;
            let out: Vec<Option<f64>> = keys
                .iter()
                .map(|k| {
                    k.as_ref()
                        .map(|k| weights.get(k.as_str()).copied().unwrap_or(*default))
                })
                .collect();
            Ok(Arc::new(Float64Array::from(out)))
        }
        Expr::StrLookup {
            input,
            mapping,
            default,
        } => {
            let keys = to_rendered_opts(&eval_expr(input, resolver)?)?;
            let out: Vec<Option<String>> = keys
                .iter()
                .map(|k| {
                    k.as_ref().map(|k| {
                        mapping
                            .get(k.as_str())
                            .cloned()
                            .unwrap_or_else(|| default.clone())
                    })
                })
                .collect();
            Ok(Arc::new(StringArray::from(out)))
        }
        Expr::LabelCode {
            input,
            codes,
            unseen,
        } => {
            let keys = to_rendered_opts(&eval_expr(input, resolver)?)?;
            let out: Vec<Option<i64>> = keys
                .iter()
                .map(|k| {
                    k.as_ref()
                        .map(|k| codes.get(k.as_str()).copied().unwrap_or(*unseen))
                })
                .collect();
            Ok(Arc::new(Int64Array::from(out)))
        }
        Expr::Indicator { input, category } => {
            let array = eval_expr(input, resolver)?;
            let category = category.render();
            let keys = to_rendered_opts(&array)?;
            let out: Vec<f64> = keys
                .iter()
                .map(|k| match k {
                    Some(k) if *k == category => 1.0,
                    _ => 0.0,
                })
                .collect();
            Ok(Arc::new(Float64Array::from(out)))
        }
        Expr::TokenIndicator { input, token } => {
            let keys = to_rendered_opts(&eval_expr(input, resolver)?)?;
            let out: Vec<f64> = keys
                .iter()
                .map(|k| match k {
                    Some(k) if k.split(',').any(|t| t.trim() == token) => 1.0,
                    _ => 0.0,
                })
                .collect();
            Ok(Arc::new(Float64Array::from(out)))
        }
        Expr::Standardize { input, mean, std } => {
            let values = to_f64_opts(&eval_expr(input, resolver)?)?;
            let out: Vec<Option<f64>> = values
                .iter()
                .map(|v| v.map(|v| (v - mean) / std))
                .collect();
            Ok(Arc::new(Float64Array::from(out)))
        }
        Expr::Decay {
            weight,
            timestamp,
            impact,
            shift,
        } => {
            let weights = to_f64_opts(&eval_expr(weight, resolver)?)?;
            let timestamps = to_f64_opts(&eval_expr(timestamp, resolver)?)?;
            if weights.len() != timestamps.len() {
                return Err(CarouselError::InternalError(
                    "Decay operands differ in length".into(),
                ));
            }
            let out: Vec<Option<f64>> = weights
                .iter()
                .zip(timestamps.iter())
                .map(|(w, t)| match (w, t) {
                    (Some(w), Some(t)) => {
                        let decay = if *t > *shift { t.powf(*impact) } else { 0.0 };
                        Some(w / (1.0001 + decay))
                    }
                    _ => None,
                })
                .collect();
            Ok(Arc::new(Float64Array::from(out)))
        }
    }
}

fn binary_f64(
    resolver: &dyn ColumnResolver,
    a: &Expr,
    b: &Expr,
    op: fn(f64, f64) -> f64,
) -> Result<ArrayRef, CarouselError> {
    let left = to_f64_opts(&eval_expr(a, resolver)?)?;
    let right = to_f64_opts(&eval_expr(b, resolver)?)?;
    if left.len() != right.len() {
        return Err(CarouselError::InternalError(
            "Binary operands differ in length".into(),
        ));
    }
    let out: Vec<Option<f64>> = left
        .iter()
        .zip(right.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(op(*x, *y)),
            _ => None,
        })
        .collect();
    Ok(Arc::new(Float64Array::from(out)))
}

//==================================================================================
// 3. Predicate Evaluation
//==================================================================================

pub(crate) fn eval_predicate(
    pred: &Predicate,
    resolver: &dyn ColumnResolver,
) -> Result<BooleanArray, CarouselError> {
    match pred {
        Predicate::Cmp { column, op, value } => {
            let array = resolver.resolve(column)?;
            compare(&array, *op, value)
        }
        Predicate::IsIn { column, values } => {
            let keys = to_rendered_opts(&resolver.resolve(column)?)?;
            let set: hashbrown::HashSet<String> =
                values.iter().map(|v| v.render()).collect();
            Ok(BooleanArray::from(
                keys.iter()
                    .map(|k| matches!(k, Some(k) if set.contains(k)))
                    .collect::<Vec<bool>>(),
            ))
        }
        Predicate::NotNull { column } => {
            let array = resolver.resolve(column)?;
            Ok(BooleanArray::from(
                (0..array.len())
                    .map(|i| !array.is_null(i))
                    .collect::<Vec<bool>>(),
            ))
        }
        Predicate::And(terms) => combine(terms, resolver, |a, b| a && b, true),
        Predicate::Or(terms) => combine(terms, resolver, |a, b| a || b, false),
        Predicate::Not(inner) => {
            let mask = eval_predicate(inner, resolver)?;
            Ok(BooleanArray::from(
                (0..mask.len())
                    .map(|i| !(mask.is_valid(i) && mask.value(i)))
                    .collect::<Vec<bool>>(),
            ))
        }
    }
}

fn combine(
    terms: &[Predicate],
    resolver: &dyn ColumnResolver,
    op: fn(bool, bool) -> bool,
    identity: bool,
) -> Result<BooleanArray, CarouselError> {
    let mut acc: Option<Vec<bool>> = None;
    for term in terms {
        let mask = eval_predicate(term, resolver)?;
        let bits: Vec<bool> = (0..mask.len())
            .map(|i| mask.is_valid(i) && mask.value(i))
            .collect();
        acc = Some(match acc {
            None => bits,
            Some(prev) => prev
                .into_iter()
                .zip(bits)
                .map(|(a, b)| op(a, b))
                .collect(),
        });
    }
    match acc {
        Some(bits) => Ok(BooleanArray::from(bits)),
        None => {
            let rows = resolver.num_rows()?;
            Ok(BooleanArray::from(vec![identity; rows]))
        }
    }
}

fn compare(array: &ArrayRef, op: CmpOp, value: &Cell) -> Result<BooleanArray, CarouselError> {
    let check = |ord: std::cmp::Ordering| match op {
        CmpOp::Eq => ord == std::cmp::Ordering::Equal,
        CmpOp::Ne => ord != std::cmp::Ordering::Equal,
        CmpOp::Lt => ord == std::cmp::Ordering::Less,
        CmpOp::Le => ord != std::cmp::Ordering::Greater,
        CmpOp::Gt => ord == std::cmp::Ordering::Greater,
        CmpOp::Ge => ord != std::cmp::Ordering::Less,
    };
    let bits: Vec<bool> = match value {
        Cell::Null => vec![false; array.len()],
        Cell::Str(s) => to_rendered_opts(array)?
            .iter()
            .map(|k| matches!(k, Some(k) if check(k.as_str().cmp(s.as_str()))))
            .collect(),
        Cell::Date(d) => to_date_opts(array)?
            .iter()
            .map(|v| matches!(v, Some(v) if check(v.cmp(d))))
            .collect(),
        other => {
            let rhs = other.as_f64().ok_or_else(|| {
                CarouselError::UnsupportedType(format!(
                    "Cannot compare against literal {:?}",
                    other
                ))
            })?;
            to_f64_opts(array)?
                .iter()
                .map(|v| match v {
                    Some(v) => v
                        .partial_cmp(&rhs)
                        .map(check)
                        .unwrap_or(false),
                    None => false,
                })
                .collect()
        }
    };
    Ok(BooleanArray::from(bits))
}

//==================================================================================
// 4. Array <-> Vec Helpers
//==================================================================================

macro_rules! downcast {
    ($array:expr, $ty:ty) => {
        $array.as_any().downcast_ref::<$ty>().ok_or_else(|| {
            CarouselError::InternalError(format!(
                "Array claims {:?} but downcast to {} failed",
                $array.data_type(),
                stringify!($ty)
            ))
        })
    };
}

/// Numeric view of any supported column.
pub(crate) fn to_f64_opts(array: &ArrayRef) -> Result<Vec<Option<f64>>, CarouselError> {
    let len = array.len();
    let mut out = Vec::with_capacity(len);
    match array.data_type() {
        ArrowDataType::Float64 => {
            let a = downcast!(array, Float64Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i)));
            }
        }
        ArrowDataType::Float32 => {
            let a = downcast!(array, Float32Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i) as f64));
            }
        }
        ArrowDataType::Int64 => {
            let a = downcast!(array, Int64Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i) as f64));
            }
        }
        ArrowDataType::Int32 => {
            let a = downcast!(array, Int32Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i) as f64));
            }
        }
        ArrowDataType::Date32 => {
            let a = downcast!(array, Date32Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i) as f64));
            }
        }
        ArrowDataType::Boolean => {
            let a = downcast!(array, BooleanArray)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i) as i64 as f64));
            }
        }
        dt => {
            return Err(CarouselError::UnsupportedType(format!(
                "Column of type {:?} has no numeric view",
                dt
            )))
        }
    }
    Ok(out)
}

/// Rendered-string view of any supported column; the canonical key space for
/// encoder vocabularies and mapping lookups.
pub(crate) fn to_rendered_opts(array: &ArrayRef) -> Result<Vec<Option<String>>, CarouselError> {
    let len = array.len();
    let mut out = Vec::with_capacity(len);
    match array.data_type() {
        ArrowDataType::Utf8 => {
            let a = downcast!(array, StringArray)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i).to_string()));
            }
        }
        ArrowDataType::Int64 => {
            let a = downcast!(array, Int64Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i).to_string()));
            }
        }
        ArrowDataType::Int32 => {
            let a = downcast!(array, Int32Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i).to_string()));
            }
        }
        ArrowDataType::Float64 => {
            let a = downcast!(array, Float64Array)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i).to_string()));
            }
        }
        ArrowDataType::Boolean => {
            let a = downcast!(array, BooleanArray)?;
            for i in 0..len {
                out.push(a.is_valid(i).then(|| a.value(i).to_string()));
            }
        }
        ArrowDataType::Date32 => {
            let a = downcast!(array, Date32Array)?;
            for i in 0..len {
                if a.is_valid(i) {
                    out.push(Some(days_to_date(a.value(i))?.format("%Y-%m-%d").to_string()));
                } else {
                    out.push(None);
                }
            }
        }
        dt => {
            return Err(CarouselError::UnsupportedType(format!(
                "Column of type {:?} has no string view",
                dt
            )))
        }
    }
    Ok(out)
}

/// Date view: `Date32` columns directly, `Utf8` columns via `%Y-%m-%d`.
pub(crate) fn to_date_opts(array: &ArrayRef) -> Result<Vec<Option<NaiveDate>>, CarouselError> {
    let len = array.len();
    let mut out = Vec::with_capacity(len);
    match array.data_type() {
        ArrowDataType::Date32 => {
            let a = downcast!(array, Date32Array)?;
            for i in 0..len {
                if a.is_valid(i) {
                    out.push(Some(days_to_date(a.value(i))?));
                } else {
                    out.push(None);
                }
            }
        }
        ArrowDataType::Utf8 => {
            let a = downcast!(array, StringArray)?;
            for i in 0..len {
                if a.is_valid(i) {
                    let parsed = NaiveDate::parse_from_str(a.value(i).trim(), "%Y-%m-%d")
                        .map_err(|_| CarouselError::DateParse {
                            column: String::new(),
                            value: a.value(i).to_string(),
                            pattern: "%Y-%m-%d".into(),
                        })?;
                    out.push(Some(parsed));
                } else {
                    out.push(None);
                }
            }
        }
        dt => {
            return Err(CarouselError::UnsupportedType(format!(
                "Column of type {:?} has no date view",
                dt
            )))
        }
    }
    Ok(out)
}

/// Builds a full-length column from a scalar.
pub(crate) fn broadcast_literal(cell: &Cell, rows: usize) -> Result<ArrayRef, CarouselError> {
    Ok(match cell {
        Cell::Null => Arc::new(Float64Array::from(vec![None::<f64>; rows])),
        Cell::Bool(v) => Arc::new(BooleanArray::from(vec![*v; rows])),
        Cell::Int(v) => Arc::new(Int64Array::from(vec![*v; rows])),
        Cell::Float(v) => Arc::new(Float64Array::from(vec![*v; rows])),
        Cell::Str(s) => Arc::new(StringArray::from(vec![s.clone(); rows])),
        Cell::Date(d) => Arc::new(Date32Array::from(vec![date_to_days(*d); rows])),
    })
}

/// Replaces missing values with a scalar, preserving the column dtype.
pub(crate) fn fill_null(array: &ArrayRef, value: &Cell) -> Result<ArrayRef, CarouselError> {
    if array.null_count() == 0 {
        return Ok(array.clone());
    }
    let dtype = CarouselDataType::from_arrow_type(array.data_type())?;
    let fill = value.cast(dtype)?;
    Ok(match (array.data_type(), &fill) {
        (ArrowDataType::Float64, Cell::Float(v)) | (ArrowDataType::Float32, Cell::Float(v)) => {
            let vals = to_f64_opts(array)?;
            Arc::new(Float64Array::from(
                vals.iter().map(|x| x.unwrap_or(*v)).collect::<Vec<f64>>(),
            ))
        }
        (ArrowDataType::Int64, Cell::Int(v)) | (ArrowDataType::Int32, Cell::Int(v)) => {
            let a = compute::cast(array, &ArrowDataType::Int64)?;
            let a = downcast!(&a, Int64Array)?;
            Arc::new(Int64Array::from(
                (0..a.len())
                    .map(|i| if a.is_valid(i) { a.value(i) } else { *v })
                    .collect::<Vec<i64>>(),
            ))
        }
        (ArrowDataType::Utf8, Cell::Str(v)) => {
            let vals = to_rendered_opts(array)?;
            Arc::new(StringArray::from(
                vals.iter()
                    .map(|x| x.clone().unwrap_or_else(|| v.clone()))
                    .collect::<Vec<String>>(),
            ))
        }
        (ArrowDataType::Date32, Cell::Date(v)) => {
            let a = downcast!(array, Date32Array)?;
            let days = date_to_days(*v);
            Arc::new(Date32Array::from(
                (0..a.len())
                    .map(|i| if a.is_valid(i) { a.value(i) } else { days })
                    .collect::<Vec<i32>>(),
            ))
        }
        (ArrowDataType::Boolean, Cell::Bool(v)) => {
            let a = downcast!(array, BooleanArray)?;
            Arc::new(BooleanArray::from(
                (0..a.len())
                    .map(|i| if a.is_valid(i) { a.value(i) } else { *v })
                    .collect::<Vec<bool>>(),
            ))
        }
        (dt, fill) => {
            return Err(CarouselError::UnsupportedType(format!(
                "Cannot fill {:?} column with {:?}",
                dt, fill
            )))
        }
    })
}

/// Extracts the first `pattern` match from each string cell and parses it as
/// a `%Y-%m-%d` date. Already-parsed `Date32` columns pass through.
fn extract_date(array: &ArrayRef, pattern: &str) -> Result<ArrayRef, CarouselError> {
    if array.data_type() == &ArrowDataType::Date32 {
        return Ok(array.clone());
    }
    let re = Regex::new(pattern)
        .map_err(|e| CarouselError::InternalError(format!("Bad date pattern: {}", e)))?;
    let values = to_rendered_opts(array)?;
    let mut out: Vec<Option<i32>> = Vec::with_capacity(values.len());
    for value in &values {
        match value {
            None => out.push(None),
            Some(s) => {
                let matched = re.find(s).ok_or_else(|| CarouselError::DateParse {
                    column: String::new(),
                    value: s.clone(),
                    pattern: pattern.to_string(),
                })?;
                let date = NaiveDate::parse_from_str(matched.as_str(), "%Y-%m-%d").map_err(
                    |_| CarouselError::DateParse {
                        column: String::new(),
                        value: s.clone(),
                        pattern: pattern.to_string(),
                    },
                )?;
                out.push(Some(date_to_days(date)));
            }
        }
    }
    Ok(Arc::new(Date32Array::from(out)))
}

/// Integer day count `base - value` between two date columns.
fn days_between(base: &ArrayRef, value: &ArrayRef) -> Result<ArrayRef, CarouselError> {
    let base = to_date_opts(base)?;
    let value = to_date_opts(value)?;
    if base.len() != value.len() {
        return Err(CarouselError::InternalError(
            "Date difference operands differ in length".into(),
        ));
    }
    let out: Vec<Option<i64>> = base
        .iter()
        .zip(value.iter())
        .map(|(b, v)| match (b, v) {
            (Some(b), Some(v)) => Some(b.signed_duration_since(*v).num_days()),
            _ => None,
        })
        .collect();
    Ok(Arc::new(Int64Array::from(out)))
}
