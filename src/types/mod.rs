//! Canonical, type-safe representations of data types and scalar values
//! used throughout the carousel pipeline.

mod data_type;
pub(crate) mod value;

pub use data_type::CarouselDataType;
pub use value::Cell;
