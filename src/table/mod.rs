// In: src/table/mod.rs

//! The lazy, column-oriented logical table.
//!
//! A `LogicalTable` is a copy-on-write view over either a set of persisted
//! chunks or a single in-memory batch. Columns are in one of three states
//! (stored / virtual / materialized); row filters are pending `Predicate`
//! selections applied on read. Every transform produces a new table and
//! leaves its input untouched, so intermediate pipeline stages can be
//! inspected or cached independently.

use std::sync::{Arc, OnceLock};

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute;
use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, Schema};
use ndarray::Array2;

use crate::error::CarouselError;
use crate::store::chunk_loader::ChunkSet;

mod column;
mod eval;
pub mod expr;

pub use column::{ColumnDef, ColumnState};
pub use expr::{CmpOp, Expr, Predicate};

pub(crate) use eval::{fill_null, to_f64_opts, to_rendered_opts};

//==================================================================================
// 1. Backing Storage
//==================================================================================

/// Where the table's stored columns live.
#[derive(Debug, Clone)]
pub enum TableData {
    /// One or more persisted chunk files, concatenated by ascending sequence id.
    Chunks(Arc<ChunkSet>),
    /// A single in-memory batch (group-by outputs, small reference tables).
    Batch(Arc<RecordBatch>),
}

//==================================================================================
// 2. The Logical Table
//==================================================================================

#[derive(Debug, Clone)]
pub struct LogicalTable {
    data: TableData,
    /// Visible columns, in order. Names are unique across visible + hidden.
    columns: Vec<ColumnDef>,
    /// Dropped columns still referenced by some virtual expression.
    hidden: Vec<ColumnDef>,
    /// Pending row filter over base rows; applied on every read.
    selection: Option<BooleanArray>,
    /// Base row count, resolved lazily for chunk-backed tables.
    base_rows: OnceLock<usize>,
}

impl LogicalTable {
    /// Wraps an in-memory batch. All columns start in the `Stored` state.
    pub fn from_batch(batch: RecordBatch) -> Self {
        let columns = batch
            .schema()
            .fields()
            .iter()
            .map(|f| ColumnDef::stored(f.name().clone()))
            .collect();
        let rows = OnceLock::new();
        let _ = rows.set(batch.num_rows());
        LogicalTable {
            data: TableData::Batch(Arc::new(batch)),
            columns,
            hidden: Vec::new(),
            selection: None,
            base_rows: rows,
        }
    }

    /// Builds an in-memory table from named arrays. Fails on duplicate names
    /// or mismatched lengths.
    pub fn from_columns(
        columns: Vec<(String, ArrayRef)>,
    ) -> Result<Self, CarouselError> {
        let mut seen = hashbrown::HashSet::new();
        for (name, _) in &columns {
            if !seen.insert(name.clone()) {
                return Err(CarouselError::DuplicateColumn(name.clone()));
            }
        }
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self::from_batch(batch))
    }

    /// Wraps a persisted chunk set. No chunk data is read here; row counts
    /// and column values are resolved on demand.
    pub fn from_chunks(chunks: Arc<ChunkSet>) -> Self {
        let columns = chunks
            .schema()
            .fields()
            .iter()
            .map(|f| ColumnDef::stored(f.name().clone()))
            .collect();
        LogicalTable {
            data: TableData::Chunks(chunks),
            columns,
            hidden: Vec::new(),
            selection: None,
            base_rows: OnceLock::new(),
        }
    }

    //------------------------------------------------------------------------------
    // Introspection
    //------------------------------------------------------------------------------

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// True when the name is taken by a visible column or by a hidden one
    /// that pending expressions still resolve against. New columns must not
    /// shadow either kind.
    pub fn name_in_use(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Visible row count (after any pending selection).
    pub fn num_rows(&self) -> Result<usize, CarouselError> {
        match &self.selection {
            Some(mask) => Ok(mask.true_count()),
            None => self.base_row_count(),
        }
    }

    fn base_row_count(&self) -> Result<usize, CarouselError> {
        if let Some(n) = self.base_rows.get() {
            return Ok(*n);
        }
        let n = match &self.data {
            TableData::Batch(batch) => batch.num_rows(),
            TableData::Chunks(chunks) => chunks.total_rows()?,
        };
        let _ = self.base_rows.set(n);
        Ok(n)
    }

    fn find(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .chain(self.hidden.iter())
            .find(|c| c.name == name)
    }

    //------------------------------------------------------------------------------
    // Evaluation
    //------------------------------------------------------------------------------

    /// Evaluates a column to a concrete array in visible-row coordinates.
    pub fn evaluate(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        let base = self.evaluate_base(name)?;
        self.apply_selection(base)
    }

    /// Evaluates an ad-hoc expression against the visible rows.
    pub fn evaluate_expr(&self, expr: &Expr) -> Result<ArrayRef, CarouselError> {
        eval::eval_expr(expr, &SelectedResolver(self))
    }

    fn apply_selection(&self, array: ArrayRef) -> Result<ArrayRef, CarouselError> {
        match &self.selection {
            Some(mask) => Ok(compute::filter(array.as_ref(), mask)?),
            None => Ok(array),
        }
    }

    /// Evaluates a column in base-row coordinates (ignoring the selection).
    ///
    /// Virtual columns must not reference themselves; transforms that rewrite
    /// a column in place evaluate against the old table first and attach the
    /// result as a materialized array.
    fn evaluate_base(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        let def = self
            .find(name)
            .ok_or_else(|| CarouselError::ColumnNotFound(name.to_string()))?;
        match &def.state {
            ColumnState::Stored => self.read_stored(name),
            ColumnState::Materialized(array) => Ok(array.clone()),
            ColumnState::Virtual(expr) => eval::eval_expr(expr, &BaseResolver(self)),
        }
    }

    fn read_stored(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        match &self.data {
            TableData::Batch(batch) => batch
                .column_by_name(name)
                .cloned()
                .ok_or_else(|| CarouselError::ColumnNotFound(name.to_string())),
            TableData::Chunks(chunks) => chunks.read_column(name),
        }
    }

    //------------------------------------------------------------------------------
    // Copy-on-write Mutations
    //------------------------------------------------------------------------------

    /// Adds or replaces a column as a pending (virtual) expression.
    pub fn set_virtual(&self, name: &str, expr: Expr) -> Self {
        let mut out = self.clone();
        match out.columns.iter_mut().find(|c| c.name == name) {
            Some(def) => def.state = ColumnState::Virtual(expr),
            None => out.columns.push(ColumnDef::virtual_(name, expr)),
        }
        out
    }

    /// Evaluates `expr` against the current table and attaches the result as
    /// a materialized column named `name` (replacing any existing column of
    /// that name). This is the safe way to rewrite a column in terms of its
    /// own previous values.
    pub fn with_eval_column(&self, name: &str, expr: &Expr) -> Result<Self, CarouselError> {
        let array = self.evaluate_expr(expr)?;
        let mut out = if self.selection.is_some() {
            self.compact()?
        } else {
            self.clone()
        };
        match out.columns.iter_mut().find(|c| c.name == name) {
            Some(def) => def.state = ColumnState::Materialized(array),
            None => out.columns.push(ColumnDef::materialized(name, array)),
        }
        Ok(out)
    }

    /// Attaches an already-computed array as a materialized column.
    pub fn with_materialized(
        &self,
        name: &str,
        array: ArrayRef,
    ) -> Result<Self, CarouselError> {
        let mut out = if self.selection.is_some() {
            self.compact()?
        } else {
            self.clone()
        };
        if array.len() != out.num_rows()? {
            return Err(CarouselError::InternalError(format!(
                "Materialized column '{}' has {} rows, table has {}",
                name,
                array.len(),
                out.num_rows()?
            )));
        }
        match out.columns.iter_mut().find(|c| c.name == name) {
            Some(def) => def.state = ColumnState::Materialized(array),
            None => out.columns.push(ColumnDef::materialized(name, array)),
        }
        Ok(out)
    }

    /// Forces the listed columns into the `Materialized` state. This is the
    /// only place virtual computation is persisted; downstream reads reuse
    /// the buffers instead of recomputing the expressions.
    ///
    /// Under an active selection the whole table is first compacted so all
    /// columns stay row-aligned.
    pub fn materialize(&self, cols: &[String]) -> Result<Self, CarouselError> {
        if self.selection.is_some() {
            return self.compact();
        }
        let mut out = self.clone();
        for name in cols {
            if !out.has_column(name) {
                continue;
            }
            let array = out.evaluate_base(name)?;
            if let Some(def) = out.columns.iter_mut().find(|c| c.name == *name) {
                def.state = ColumnState::Materialized(array);
            }
        }
        Ok(out)
    }

    /// Materializes every column (visible and hidden) through the pending
    /// selection, producing a table with no selection and a fresh base.
    pub fn compact(&self) -> Result<Self, CarouselError> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for def in &self.columns {
            columns.push(ColumnDef::materialized(
                def.name.clone(),
                self.evaluate(&def.name)?,
            ));
        }
        let mut hidden = Vec::with_capacity(self.hidden.len());
        for def in &self.hidden {
            hidden.push(ColumnDef::materialized(
                def.name.clone(),
                self.evaluate(&def.name)?,
            ));
        }
        let rows = OnceLock::new();
        let _ = rows.set(self.num_rows()?);
        Ok(LogicalTable {
            data: self.data.clone(),
            columns,
            hidden,
            selection: None,
            base_rows: rows,
        })
    }

    /// Removes the listed columns; names absent from the table are silently
    /// ignored. A column still referenced by some virtual expression is moved
    /// to the hidden set instead of being deleted, so pending expressions
    /// keep resolving.
    pub fn drop_columns(&self, cols: &[String]) -> Self {
        let mut out = self.clone();
        for name in cols {
            let Some(pos) = out.columns.iter().position(|c| c.name == *name) else {
                continue;
            };
            let def = out.columns.remove(pos);
            let referenced = out
                .columns
                .iter()
                .chain(out.hidden.iter())
                .any(|c| c.references(name));
            if referenced {
                out.hidden.push(def);
            }
        }
        out
    }

    /// Restricts the table to the listed columns, in the given order.
    pub fn select_columns(&self, keep: &[String]) -> Result<Self, CarouselError> {
        for name in keep {
            if !self.has_column(name) {
                return Err(CarouselError::ColumnNotFound(name.clone()));
            }
        }
        let dropped: Vec<String> = self
            .column_names()
            .into_iter()
            .filter(|n| !keep.contains(n))
            .collect();
        let mut out = self.drop_columns(&dropped);
        out.columns
            .sort_by_key(|c| keep.iter().position(|k| *k == c.name));
        Ok(out)
    }

    /// Applies a row predicate, composing with any existing selection.
    pub fn filter(&self, pred: &Predicate) -> Result<Self, CarouselError> {
        let mask = eval::eval_predicate(pred, &BaseResolver(self))?;
        let combined = match &self.selection {
            None => mask,
            Some(prev) => {
                let bits: Vec<bool> = (0..prev.len())
                    .map(|i| {
                        prev.is_valid(i)
                            && prev.value(i)
                            && mask.is_valid(i)
                            && mask.value(i)
                    })
                    .collect();
                BooleanArray::from(bits)
            }
        };
        let mut out = self.clone();
        out.selection = Some(combined);
        Ok(out)
    }

    /// Evaluates a predicate over the visible rows as a plain boolean mask.
    /// Null comparisons count as false.
    pub fn predicate_mask(&self, pred: &Predicate) -> Result<Vec<bool>, CarouselError> {
        let mask = eval::eval_predicate(pred, &SelectedResolver(self))?;
        Ok((0..mask.len())
            .map(|i| mask.is_valid(i) && mask.value(i))
            .collect())
    }

    //------------------------------------------------------------------------------
    // Export
    //------------------------------------------------------------------------------

    /// Distinct non-null values of a column in their canonical string
    /// rendering, sorted ascending.
    pub fn distinct_rendered(&self, name: &str) -> Result<Vec<String>, CarouselError> {
        let values = to_rendered_opts(&self.evaluate(name)?)?;
        let set: std::collections::BTreeSet<String> =
            values.into_iter().flatten().collect();
        Ok(set.into_iter().collect())
    }

    /// Fully materializes the visible columns into one in-memory batch.
    pub fn to_batch(&self) -> Result<RecordBatch, CarouselError> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays = Vec::with_capacity(self.columns.len());
        for def in &self.columns {
            let array = self.evaluate(&def.name)?;
            fields.push(Field::new(&def.name, array.data_type().clone(), true));
            arrays.push(array);
        }
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Exports the visible columns as a dense row-major feature matrix.
    /// Missing values become 0.0 (the pipeline's numeric-null policy).
    pub fn to_matrix(&self) -> Result<Array2<f64>, CarouselError> {
        let rows = self.num_rows()?;
        let cols = self.columns.len();
        let mut flat = vec![0.0f64; rows * cols];
        for (j, def) in self.columns.iter().enumerate() {
            let values = to_f64_opts(&self.evaluate(&def.name)?)?;
            for (i, v) in values.into_iter().enumerate() {
                flat[i * cols + j] = v.unwrap_or(0.0);
            }
        }
        Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| CarouselError::InternalError(format!("Matrix export failed: {}", e)))
    }
}

//==================================================================================
// 3. Resolvers
//==================================================================================

/// Resolves columns in base-row coordinates (for filter-mask construction).
struct BaseResolver<'a>(&'a LogicalTable);

impl eval::ColumnResolver for BaseResolver<'_> {
    fn resolve(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        self.0.evaluate_base(name)
    }
    fn num_rows(&self) -> Result<usize, CarouselError> {
        self.0.base_row_count()
    }
}

/// Resolves columns in visible-row coordinates (for derived columns).
struct SelectedResolver<'a>(&'a LogicalTable);

impl eval::ColumnResolver for SelectedResolver<'_> {
    fn resolve(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        self.0.evaluate(name)
    }
    fn num_rows(&self) -> Result<usize, CarouselError> {
        self.0.num_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    fn sample() -> LogicalTable {
        LogicalTable::from_columns(vec![
            (
                "user".into(),
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            ),
            (
                "amount".into(),
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_virtual_column_is_lazy_then_materialized() {
        let t = sample().set_virtual(
            "double",
            Expr::Mul(
                Box::new(Expr::col("amount")),
                Box::new(Expr::Literal(Cell::Float(2.0))),
            ),
        );
        let arr = t.evaluate("double").unwrap();
        let arr = arr.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(arr.values(), &[2.0, 4.0, 6.0]);

        let forced = t.materialize(&["double".into()]).unwrap();
        assert!(matches!(
            forced.find("double").unwrap().state,
            ColumnState::Materialized(_)
        ));
    }

    #[test]
    fn test_filter_then_compact_keeps_alignment() {
        let t = sample()
            .filter(&Predicate::Cmp {
                column: "amount".into(),
                op: CmpOp::Gt,
                value: Cell::Float(1.5),
            })
            .unwrap();
        assert_eq!(t.num_rows().unwrap(), 2);
        let compacted = t.compact().unwrap();
        assert_eq!(compacted.num_rows().unwrap(), 2);
        let users = to_rendered_opts(&compacted.evaluate("user").unwrap()).unwrap();
        assert_eq!(users, vec![Some("b".to_string()), Some("c".to_string())]);
    }

    #[test]
    fn test_drop_hides_referenced_columns() {
        let t = sample().set_virtual(
            "double",
            Expr::Mul(
                Box::new(Expr::col("amount")),
                Box::new(Expr::Literal(Cell::Float(2.0))),
            ),
        );
        let t = t.drop_columns(&["amount".into()]);
        assert!(!t.has_column("amount"));
        // The pending expression still resolves through the hidden column.
        let arr = t.evaluate("double").unwrap();
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn test_to_matrix_row_major() {
        let t = LogicalTable::from_columns(vec![
            (
                "x".into(),
                Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
            ),
            (
                "y".into(),
                Arc::new(Float64Array::from(vec![10.0, 20.0])) as ArrayRef,
            ),
        ])
        .unwrap();
        let m = t.to_matrix().unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m[[1, 0]], 2.0);
        assert_eq!(m[[0, 1]], 10.0);
    }
}
