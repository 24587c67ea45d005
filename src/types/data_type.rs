//! This module defines the canonical, type-safe representation of column types
//! used throughout the carousel pipeline.

use arrow_schema::DataType as ArrowDataType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CarouselError;

/// The canonical, internal representation of a column type in the carousel pipeline.
///
/// This enum replaces the stringly-typed dtype declarations of the fetch
/// configuration, enabling compile-time checks and eliminating an entire class
/// of runtime errors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CarouselDataType {
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Boolean,
    Date32,
}

impl CarouselDataType {
    /// Converts an Arrow `DataType` into a `CarouselDataType`.
    pub fn from_arrow_type(arrow_type: &ArrowDataType) -> Result<Self, CarouselError> {
        match arrow_type {
            ArrowDataType::Int32 => Ok(Self::Int32),
            ArrowDataType::Int64 => Ok(Self::Int64),
            ArrowDataType::Float32 => Ok(Self::Float32),
            ArrowDataType::Float64 => Ok(Self::Float64),
            ArrowDataType::Utf8 => Ok(Self::Utf8),
            ArrowDataType::Boolean => Ok(Self::Boolean),
            ArrowDataType::Date32 => Ok(Self::Date32),
            dt => Err(CarouselError::UnsupportedType(format!(
                "Cannot convert Arrow type {:?} to CarouselDataType",
                dt
            ))),
        }
    }

    /// Converts a `CarouselDataType` back into an Arrow `DataType`.
    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Int32 => ArrowDataType::Int32,
            Self::Int64 => ArrowDataType::Int64,
            Self::Float32 => ArrowDataType::Float32,
            Self::Float64 => ArrowDataType::Float64,
            Self::Utf8 => ArrowDataType::Utf8,
            Self::Boolean => ArrowDataType::Boolean,
            Self::Date32 => ArrowDataType::Date32,
        }
    }

    /// Parses the dtype name strings used by the fetch configuration
    /// (column metadata is an ordered name -> optional type-name mapping).
    pub fn parse(name: &str) -> Result<Self, CarouselError> {
        match name {
            "int32" | "int" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "float32" => Ok(Self::Float32),
            "float64" | "float" => Ok(Self::Float64),
            "str" | "utf8" | "string" => Ok(Self::Utf8),
            "bool" | "boolean" => Ok(Self::Boolean),
            "date" | "date32" => Ok(Self::Date32),
            other => Err(CarouselError::UnsupportedType(format!(
                "Unknown dtype name '{}'",
                other
            ))),
        }
    }

    /// Returns `true` if the data type is a floating-point number. Float columns
    /// get the zero-fill null policy during ingestion.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Returns `true` if the data type is an integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }
}

/// Provides the canonical string representation for a `CarouselDataType`.
impl fmt::Display for CarouselDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_roundtrip() {
        for dt in [
            CarouselDataType::Int32,
            CarouselDataType::Int64,
            CarouselDataType::Float64,
            CarouselDataType::Utf8,
            CarouselDataType::Boolean,
            CarouselDataType::Date32,
        ] {
            assert_eq!(
                CarouselDataType::from_arrow_type(&dt.to_arrow_type()).unwrap(),
                dt
            );
        }
    }

    #[test]
    fn test_parse_config_names() {
        assert_eq!(
            CarouselDataType::parse("float64").unwrap(),
            CarouselDataType::Float64
        );
        assert_eq!(
            CarouselDataType::parse("str").unwrap(),
            CarouselDataType::Utf8
        );
        assert!(CarouselDataType::parse("decimal").is_err());
    }
}
