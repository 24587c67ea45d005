//! This file is the root of the `carousel_core` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of our library (`table`, `store`,
//!     `transforms`, `pipelines`) so the Rust compiler knows they exist.
//! 2.  Re-exporting the small set of types that make up the public surface
//!     consumed by the orchestration layer.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod config;
pub mod pipelines;
pub mod store;
pub mod table;
pub mod transforms;
pub mod types;

mod error;

//==================================================================================
// 2. Public API Re-exports
//==================================================================================
pub use crate::error::CarouselError;
pub use crate::table::LogicalTable;
pub use crate::types::{Cell, CarouselDataType};
