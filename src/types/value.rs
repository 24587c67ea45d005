//! The `Cell` scalar: the unit value ingested from the streaming cursor and
//! the literal type used by expressions, predicates and fill values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CarouselError;
use crate::types::CarouselDataType;

/// Days between the CE epoch and the Arrow epoch (1970-01-01).
const UNIX_EPOCH_FROM_CE: i64 = 719_163;

/// A single scalar value. Rows arriving from the cursor are ordered mappings
/// from column name to `Cell`.
///
/// Serde note: the untagged representation lets configuration files write
/// plain JSON scalars for fill values (`0.0`, `"unknown"`, ...). `Str` is
/// tried before `Date`, so date-shaped strings stay strings until
/// `normalize_date` parses them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// The natural dtype of this scalar, or `None` for nulls.
    pub fn dtype(&self) -> Option<CarouselDataType> {
        match self {
            Cell::Null => None,
            Cell::Bool(_) => Some(CarouselDataType::Boolean),
            Cell::Int(_) => Some(CarouselDataType::Int64),
            Cell::Float(_) => Some(CarouselDataType::Float64),
            Cell::Str(_) => Some(CarouselDataType::Utf8),
            Cell::Date(_) => Some(CarouselDataType::Date32),
        }
    }

    /// Numeric view of the scalar, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Coerces the scalar to the requested dtype. Strings are parsed for
    /// numeric targets; incompatible combinations fail rather than silently
    /// truncating.
    pub fn cast(&self, dtype: CarouselDataType) -> Result<Cell, CarouselError> {
        if self.is_null() {
            return Ok(Cell::Null);
        }
        let err = || {
            CarouselError::UnsupportedType(format!("Cannot cast {:?} to {}", self, dtype))
        };
        match dtype {
            CarouselDataType::Int32 | CarouselDataType::Int64 => match self {
                Cell::Int(v) => Ok(Cell::Int(*v)),
                Cell::Float(v) => Ok(Cell::Int(*v as i64)),
                Cell::Bool(v) => Ok(Cell::Int(*v as i64)),
                Cell::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Cell::Int)
                    .map_err(|_| err()),
                _ => Err(err()),
            },
            CarouselDataType::Float32 | CarouselDataType::Float64 => match self {
                Cell::Int(v) => Ok(Cell::Float(*v as f64)),
                Cell::Float(v) => Ok(Cell::Float(*v)),
                Cell::Bool(v) => Ok(Cell::Float(*v as i64 as f64)),
                Cell::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Cell::Float)
                    .map_err(|_| err()),
                _ => Err(err()),
            },
            CarouselDataType::Utf8 => Ok(Cell::Str(self.render())),
            CarouselDataType::Boolean => match self {
                Cell::Bool(v) => Ok(Cell::Bool(*v)),
                Cell::Int(v) => Ok(Cell::Bool(*v != 0)),
                _ => Err(err()),
            },
            CarouselDataType::Date32 => match self {
                Cell::Date(d) => Ok(Cell::Date(*d)),
                Cell::Str(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(Cell::Date)
                    .map_err(|_| err()),
                _ => Err(err()),
            },
        }
    }

    /// Canonical string rendering, used for encoder vocabularies and derived
    /// column names (`offer_id_123`, ...).
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::from("null"),
            Cell::Bool(v) => v.to_string(),
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Str(s) => s.clone(),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Converts a `NaiveDate` to Arrow `Date32` storage (days since 1970-01-01).
pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    (date.num_days_from_ce() as i64 - UNIX_EPOCH_FROM_CE) as i32
}

/// Converts Arrow `Date32` storage back into a `NaiveDate`.
pub(crate) fn days_to_date(days: i32) -> Result<NaiveDate, CarouselError> {
    NaiveDate::from_num_days_from_ce_opt((days as i64 + UNIX_EPOCH_FROM_CE) as i32).ok_or_else(
        || CarouselError::InternalError(format!("Date32 value {} out of range", days)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date32_epoch_mapping() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_days(epoch), 0);
        let d = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(days_to_date(date_to_days(d)).unwrap(), d);
    }

    #[test]
    fn test_cast_str_to_numeric() {
        assert_eq!(
            Cell::Str("42".into()).cast(CarouselDataType::Int64).unwrap(),
            Cell::Int(42)
        );
        assert_eq!(
            Cell::Str("1.5".into())
                .cast(CarouselDataType::Float64)
                .unwrap(),
            Cell::Float(1.5)
        );
        assert!(Cell::Str("abc".into()).cast(CarouselDataType::Int64).is_err());
    }

    #[test]
    fn test_untagged_serde_for_fill_values() {
        let cell: Cell = serde_json::from_str("0.5").unwrap();
        assert_eq!(cell, Cell::Float(0.5));
        let cell: Cell = serde_json::from_str("\"2024-01-01\"").unwrap();
        // Date-shaped strings stay strings; normalize_date owns the parse.
        assert_eq!(cell, Cell::Str("2024-01-01".into()));
    }
}
