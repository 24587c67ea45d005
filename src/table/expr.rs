// In: src/table/expr.rs

//! The typed derivation language for virtual columns and row filters.
//!
//! A `Virtual` column carries a pending `Expr` over existing columns and only
//! touches storage when explicitly forced. Row filters are expressed as
//! `Predicate` trees (conjunction/disjunction of column-comparison terms),
//! replacing the stringly-typed filter expressions of earlier incarnations
//! of this pipeline.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{CarouselDataType, Cell};

//==================================================================================
// 1. Virtual-Column Expressions
//==================================================================================

/// A pending, per-row expression over existing columns.
///
/// Expressions are pure data. Evaluation happens in `table::eval`, the single
/// place computation is allowed (the materialization point).
#[derive(Debug, Clone)]
pub enum Expr {
    /// Reference to a column of the table (visible or hidden).
    Column(String),
    /// A scalar broadcast to every row.
    Literal(Cell),
    /// Replace missing values with a scalar.
    FillNull(Box<Expr>, Cell),
    /// Cast to a target dtype via the Arrow cast kernels.
    Cast(Box<Expr>, CarouselDataType),
    /// Extract the first substring matching `pattern` from a string column and
    /// parse it as a `%Y-%m-%d` date. Fails when no substring matches.
    ExtractDate { input: Box<Expr>, pattern: String },
    /// Integer day count `base - value` between two date expressions.
    DaysBetween { base: Box<Expr>, value: Box<Expr> },
    /// Element-wise sum of two numeric expressions.
    Add(Box<Expr>, Box<Expr>),
    /// Element-wise difference of two numeric expressions.
    Sub(Box<Expr>, Box<Expr>),
    /// Element-wise product of two numeric expressions.
    Mul(Box<Expr>, Box<Expr>),
    /// Element-wise quotient of two numeric expressions.
    Div(Box<Expr>, Box<Expr>),
    /// Numeric weight lookup keyed by the rendered cell value.
    WeightLookup {
        input: Box<Expr>,
        weights: Arc<HashMap<String, f64>>,
        default: f64,
    },
    /// String-to-string mapping lookup (e.g. user id -> segment label).
    StrLookup {
        input: Box<Expr>,
        mapping: Arc<HashMap<String, String>>,
        default: String,
    },
    /// Label-encode lookup; unseen values map to the `unseen` sentinel.
    LabelCode {
        input: Box<Expr>,
        codes: Arc<HashMap<String, i64>>,
        unseen: i64,
    },
    /// One-hot indicator: 1.0 where the cell equals `category`, else 0.0.
    Indicator { input: Box<Expr>, category: Cell },
    /// Multi-hot indicator: 1.0 where the comma-separated token set in the
    /// cell contains `token`, else 0.0.
    TokenIndicator { input: Box<Expr>, token: String },
    /// Standardization `(x - mean) / std` with a pre-fitted mean/std pair.
    Standardize {
        input: Box<Expr>,
        mean: f64,
        std: f64,
    },
    /// Time-decay reweighting: `w / (1.0001 + t^impact)` when `t > shift`,
    /// else `w / 1.0001` (zero decay).
    Decay {
        weight: Box<Expr>,
        timestamp: Box<Expr>,
        impact: f64,
        shift: f64,
    },
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Whether evaluating this expression reads `name`. Used by `drop` to
    /// decide between removing a column and merely hiding it.
    pub fn references(&self, name: &str) -> bool {
        match self {
            Expr::Column(c) => c == name,
            Expr::Literal(_) => false,
            Expr::FillNull(inner, _)
            | Expr::Cast(inner, _)
            | Expr::ExtractDate { input: inner, .. }
            | Expr::WeightLookup { input: inner, .. }
            | Expr::StrLookup { input: inner, .. }
            | Expr::LabelCode { input: inner, .. }
            | Expr::Indicator { input: inner, .. }
            | Expr::TokenIndicator { input: inner, .. }
            | Expr::Standardize { input: inner, .. } => inner.references(name),
            Expr::DaysBetween { base, value } => base.references(name) || value.references(name),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.references(name) || b.references(name)
            }
            Expr::Decay {
                weight, timestamp, ..
            } => weight.references(name) || timestamp.references(name),
        }
    }
}

//==================================================================================
// 2. Row Predicates
//==================================================================================

/// Comparison operators usable in predicate terms.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A row-level boolean predicate over table columns.
///
/// Null semantics: a comparison against a null cell is false (never true),
/// matching SQL-style three-valued logic collapsed to a filter mask.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Cmp {
        column: String,
        op: CmpOp,
        value: Cell,
    },
    /// Membership in a literal value set.
    IsIn { column: String, values: Vec<Cell> },
    NotNull { column: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Convenience constructor for the most common term.
    pub fn eq(column: impl Into<String>, value: Cell) -> Self {
        Predicate::Cmp {
            column: column.into(),
            op: CmpOp::Eq,
            value,
        }
    }

    /// Conjunction of this predicate with another.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut terms) => {
                terms.push(other);
                Predicate::And(terms)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Column names this predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Predicate::Cmp { column, .. }
            | Predicate::IsIn { column, .. }
            | Predicate::NotNull { column } => vec![column.as_str()],
            Predicate::And(terms) | Predicate::Or(terms) => {
                terms.iter().flat_map(|t| t.columns()).collect()
            }
            Predicate::Not(inner) => inner.columns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_references() {
        let expr = Expr::Mul(
            Box::new(Expr::col("offer_id_3")),
            Box::new(Expr::col("event_type")),
        );
        assert!(expr.references("event_type"));
        assert!(!expr.references("offer_id"));
    }

    #[test]
    fn test_predicate_serde_roundtrip() {
        let pred = Predicate::eq("event_timestamp", Cell::Int(3))
            .and(Predicate::NotNull {
                column: "offer_id".into(),
            });
        let json = serde_json::to_string(&pred).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pred);
    }
}
