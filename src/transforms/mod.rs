// In: src/transforms/mod.rs

//! The reusable table-transform primitives.
//!
//! Every primitive takes a `LogicalTable` by reference, never mutates it, and
//! returns a new table (optionally paired with fitted encoder state). Each
//! has an explicit materialization point; composition order is the caller's
//! contract.

use chrono::NaiveDate;

use crate::error::CarouselError;
use crate::table::{Expr, LogicalTable, Predicate};
use crate::types::Cell;

pub mod encode;
pub mod groupby;
pub mod scale;

pub use encode::{label_encode, multi_hot_encode, one_hot_encode};
pub use encode::{LabelEncoder, MultiHotEncoder, OneHotEncoder};
pub use groupby::{group_by_aggregate, AggFunc, Aggregation};
pub use scale::{scale, StandardScaler};

#[cfg(test)]
mod tests;

/// Default pattern for extracting date substrings during normalization.
pub const DATE_PATTERN: &str = r"\d{4}-\d{2}-\d{2}";

/// Removes the listed columns; names absent from the table are silently
/// ignored (upstream column sets vary by feature configuration).
pub fn drop_columns(data: &LogicalTable, cols: &[String]) -> LogicalTable {
    data.drop_columns(cols)
}

/// Replaces missing values in the listed columns with `value`, then forces
/// materialization of those columns.
pub fn fillna(
    data: &LogicalTable,
    cols: &[String],
    value: &Cell,
) -> Result<LogicalTable, CarouselError> {
    let mut df = data.clone();
    for col in cols {
        df = df.with_eval_column(
            col,
            &Expr::FillNull(Box::new(Expr::col(col.clone())), value.clone()),
        )?;
    }
    Ok(df)
}

/// Casts the listed columns to 64-bit integers and materializes them.
pub fn force_int(data: &LogicalTable, cols: &[String]) -> Result<LogicalTable, CarouselError> {
    let mut df = data.clone();
    for col in cols {
        df = df.with_eval_column(
            col,
            &Expr::Cast(
                Box::new(Expr::col(col.clone())),
                crate::types::CarouselDataType::Int64,
            ),
        )?;
    }
    Ok(df)
}

/// Fills missing values with `fallback`, then extracts the first substring
/// matching `pattern` from each value and parses it as a date; materializes.
/// Fails with `DateParse` when a value has no matching substring.
pub fn normalize_date(
    data: &LogicalTable,
    cols: &[String],
    fallback: NaiveDate,
    pattern: Option<&str>,
) -> Result<LogicalTable, CarouselError> {
    let pattern = pattern.unwrap_or(DATE_PATTERN);
    let mut df = data.clone();
    for col in cols {
        let expr = Expr::ExtractDate {
            input: Box::new(Expr::FillNull(
                Box::new(Expr::col(col.clone())),
                Cell::Date(fallback),
            )),
            pattern: pattern.to_string(),
        };
        df = df.with_eval_column(col, &expr).map_err(|e| match e {
            // Attach the offending column to the parse error.
            CarouselError::DateParse { value, pattern, .. } => CarouselError::DateParse {
                column: col.clone(),
                value,
                pattern,
            },
            other => other,
        })?;
    }
    Ok(df)
}

/// Replaces each listed column with the integer day count
/// `base_col - column`; materializes; optionally drops `base_col` afterward.
pub fn date_difference(
    data: &LogicalTable,
    cols: &[String],
    base_col: &str,
    drop_base: bool,
) -> Result<LogicalTable, CarouselError> {
    let mut df = data.clone();
    for col in cols {
        df = df.with_eval_column(
            col,
            &Expr::DaysBetween {
                base: Box::new(Expr::col(base_col)),
                value: Box::new(Expr::col(col.clone())),
            },
        )?;
    }
    if drop_base {
        df = df.drop_columns(&[base_col.to_string()]);
    }
    Ok(df)
}

/// Adds a new column filled with `value` for every row. Fails with
/// `DuplicateColumn` when the name already exists, visible or hidden; a
/// hidden column is still resolved by pending expressions, so shadowing it
/// would silently rewrite them. That is a pipeline configuration bug, not a
/// recoverable condition.
pub fn add_constant(
    data: &LogicalTable,
    col: &str,
    value: Cell,
) -> Result<LogicalTable, CarouselError> {
    if data.name_in_use(col) {
        return Err(CarouselError::DuplicateColumn(col.to_string()));
    }
    data.with_eval_column(col, &Expr::Literal(value))
}

/// Returns the rows satisfying `pred`; a no-op when the predicate is absent.
pub fn filter_rows(
    data: &LogicalTable,
    pred: Option<&Predicate>,
) -> Result<LogicalTable, CarouselError> {
    match pred {
        Some(pred) => data.filter(pred),
        None => Ok(data.clone()),
    }
}
