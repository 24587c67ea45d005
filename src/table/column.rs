// In: src/table/column.rs

//! The two-state (plus storage-backed) column representation of the logical
//! table. `Virtual` columns hold a pending expression; `Materialized` columns
//! are backed by a concrete Arrow buffer; `Stored` columns read from the
//! table's backing chunks on demand.

use arrow::array::ArrayRef;

use crate::table::expr::Expr;

/// Where a column's values come from.
#[derive(Debug, Clone)]
pub enum ColumnState {
    /// Read lazily from the backing chunk set (or in-memory batch) by name.
    Stored,
    /// Defined by a pending expression; computed only when forced.
    Virtual(Expr),
    /// Backed by a concrete in-memory Arrow array.
    Materialized(ArrayRef),
}

/// A named column of a logical table.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub state: ColumnState,
}

impl ColumnDef {
    pub fn stored(name: impl Into<String>) -> Self {
        ColumnDef {
            name: name.into(),
            state: ColumnState::Stored,
        }
    }

    pub fn virtual_(name: impl Into<String>, expr: Expr) -> Self {
        ColumnDef {
            name: name.into(),
            state: ColumnState::Virtual(expr),
        }
    }

    pub fn materialized(name: impl Into<String>, array: ArrayRef) -> Self {
        ColumnDef {
            name: name.into(),
            state: ColumnState::Materialized(array),
        }
    }

    /// Whether this column's pending expression reads `name`.
    pub fn references(&self, name: &str) -> bool {
        match &self.state {
            ColumnState::Virtual(expr) => expr.references(name),
            _ => false,
        }
    }
}
