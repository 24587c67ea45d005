// In: src/error.rs

//! This module defines the single, unified error type for the entire carousel library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarouselError {
    // =========================================================================
    // === High-Level, Semantic Errors (Specific to our library's logic)
    // =========================================================================
    /// No chunk files were found when assembling the logical table after ingestion.
    #[error("No chunk data found in '{0}'")]
    MissingData(String),

    /// A value failed to match the expected date pattern during normalization.
    #[error("Date parsing failed for column '{column}': value '{value}' does not match '{pattern}'")]
    DateParse {
        column: String,
        value: String,
        pattern: String,
    },

    /// `add_constant` was invoked with a column name that already exists.
    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    /// A group-by aggregation entry named a function outside the supported set.
    #[error("Unknown aggregate function '{0}' (expected count/mean/max/sum/first/std)")]
    UnknownAggregate(String),

    /// A referenced column does not exist in the table.
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Unsupported data type for this operation: {0}")]
    UnsupportedType(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error originating from the underlying I/O subsystem (e.g., file not found).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically during config deserialization.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error surfaced by the upstream streaming cursor. Never retried here;
    /// already-written chunks are left on disk for forensic inspection.
    #[error("Source cursor failed: {0}")]
    CursorError(String),
}
