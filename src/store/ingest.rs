// In: src/store/ingest.rs

//! The streaming ingestor: drives a row cursor in bounded batches, applies
//! per-column type coercion and null handling, persists each batch as one
//! chunk, and finally reopens the chunk directory as a single lazy table.
//!
//! Null policy: columns with a declared floating dtype have their missing
//! values replaced with 0.0 *before* the cast; nulls in numeric columns are
//! never propagated. Columns with no declared dtype pass through unchanged,
//! including their own nulls.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use hashbrown::HashMap;
use log::info;

use crate::error::CarouselError;
use crate::store::{chunk_writer, safe_dir, CHUNK_EXT};
use crate::store::chunk_loader;
use crate::table::LogicalTable;
use crate::types::value::date_to_days;
use crate::types::{CarouselDataType, Cell};

/// Name of the hidden chunk directory created parallel to the save path.
const TEMPDIR: &str = ".temp";

//==================================================================================
// 1. Cursor Contract
//==================================================================================

/// The streaming query-result cursor the ingestor consumes.
///
/// Implementations yield successive row batches of at most the requested
/// size, in the cursor's natural row order, and return `None` when
/// exhausted. A cursor is consumed exactly once, sequentially, by one
/// ingestion call; closing the underlying connection is the implementor's
/// concern on drop.
pub trait RowStream {
    /// The ordered column list of the result set.
    fn columns(&self) -> &[String];

    /// Pulls the next batch of rows; each row is aligned with `columns()`.
    fn next_batch(
        &mut self,
        max_rows: usize,
    ) -> Result<Option<Vec<Vec<Cell>>>, CarouselError>;
}

//==================================================================================
// 2. Chunkwise Fetch
//==================================================================================

/// Streams the cursor into `chunksize`-row chunks under `<savedir>/.temp`,
/// then opens them as one logical table. The temp directory is owned by the
/// returned table's chunk set and removed when the last reference drops.
///
/// Failure policy: a failed chunk write aborts ingestion and leaves the
/// already-written chunks on disk for manual inspection.
pub fn fetch_chunkwise(
    stream: &mut dyn RowStream,
    chunksize: usize,
    dtypes: &HashMap<String, CarouselDataType>,
    droplist: &[String],
    savedir: &Path,
) -> Result<LogicalTable, CarouselError> {
    let tempdir = savedir.join(TEMPDIR);
    safe_dir(&tempdir)?;

    let columns = stream.columns().to_vec();
    let mut chunk_id = 0usize;
    while let Some(rows) = stream.next_batch(chunksize)? {
        if rows.is_empty() {
            continue;
        }
        info!("fetching chunk #{}", chunk_id);
        let batch = coerce_batch(&columns, rows, dtypes, droplist)?;
        let path = tempdir.join(format!("{}.{}", chunk_id, CHUNK_EXT));
        chunk_writer::write_chunk_from_columns(batch, &path, &[])?;
        chunk_id += 1;
    }

    chunk_loader::load_chunks(&tempdir, true)
}

/// Applies the drop list and per-column coercion policy to one row batch,
/// producing named arrays ready for the chunk writer.
fn coerce_batch(
    columns: &[String],
    rows: Vec<Vec<Cell>>,
    dtypes: &HashMap<String, CarouselDataType>,
    droplist: &[String],
) -> Result<Vec<(String, ArrayRef)>, CarouselError> {
    let mut out = Vec::with_capacity(columns.len());
    for (j, name) in columns.iter().enumerate() {
        if droplist.contains(name) {
            continue;
        }
        let mut cells: Vec<Cell> = rows
            .iter()
            .map(|row| row.get(j).cloned().unwrap_or(Cell::Null))
            .collect();

        match dtypes.get(name) {
            Some(dtype) if dtype.is_float() => {
                // Zero-fill before the cast; float columns never keep nulls.
                for cell in cells.iter_mut() {
                    if cell.is_null() {
                        *cell = Cell::Float(0.0);
                    }
                }
                out.push((name.clone(), build_array(&cells, *dtype)?));
            }
            Some(dtype) => {
                out.push((name.clone(), build_array(&cells, *dtype)?));
            }
            None => {
                let inferred = infer_dtype(&cells);
                out.push((name.clone(), build_array(&cells, inferred)?));
            }
        }
    }
    Ok(out)
}

/// Dtype of the first non-null cell, defaulting to Utf8 for all-null columns.
fn infer_dtype(cells: &[Cell]) -> CarouselDataType {
    cells
        .iter()
        .find_map(|c| c.dtype())
        .unwrap_or(CarouselDataType::Utf8)
}

/// Builds a typed Arrow array from scalar cells, casting each cell to the
/// target dtype. A cell that cannot be coerced fails the whole chunk.
pub(crate) fn build_array(
    cells: &[Cell],
    dtype: CarouselDataType,
) -> Result<ArrayRef, CarouselError> {
    match dtype {
        CarouselDataType::Int32 | CarouselDataType::Int64 => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                values.push(match cell.cast(dtype)? {
                    Cell::Null => None,
                    Cell::Int(v) => Some(v),
                    other => {
                        return Err(CarouselError::InternalError(format!(
                            "Int cast produced {:?}",
                            other
                        )))
                    }
                });
            }
            Ok(Arc::new(Int64Array::from(values)))
        }
        CarouselDataType::Float32 | CarouselDataType::Float64 => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                values.push(match cell.cast(dtype)? {
                    Cell::Null => None,
                    Cell::Float(v) => Some(v),
                    other => {
                        return Err(CarouselError::InternalError(format!(
                            "Float cast produced {:?}",
                            other
                        )))
                    }
                });
            }
            Ok(Arc::new(Float64Array::from(values)))
        }
        CarouselDataType::Utf8 => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| (!c.is_null()).then(|| c.render()))
                .collect();
            Ok(Arc::new(StringArray::from(values)))
        }
        CarouselDataType::Boolean => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                values.push(match cell.cast(dtype)? {
                    Cell::Null => None,
                    Cell::Bool(v) => Some(v),
                    other => {
                        return Err(CarouselError::InternalError(format!(
                            "Bool cast produced {:?}",
                            other
                        )))
                    }
                });
            }
            Ok(Arc::new(BooleanArray::from(values)))
        }
        CarouselDataType::Date32 => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                values.push(match cell.cast(dtype)? {
                    Cell::Null => None,
                    Cell::Date(d) => Some(date_to_days(d)),
                    other => {
                        return Err(CarouselError::InternalError(format!(
                            "Date cast produced {:?}",
                            other
                        )))
                    }
                });
            }
            Ok(Arc::new(Date32Array::from(values)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// A synthetic in-memory cursor for ingestion tests.
    pub struct VecStream {
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
        cursor: usize,
    }

    impl VecStream {
        pub fn new(columns: &[&str], rows: Vec<Vec<Cell>>) -> Self {
            VecStream {
                columns: columns.iter().map(|s| s.to_string()).collect(),
                rows,
                cursor: 0,
            }
        }
    }

    impl RowStream for VecStream {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn next_batch(
            &mut self,
            max_rows: usize,
        ) -> Result<Option<Vec<Vec<Cell>>>, CarouselError> {
            if self.cursor >= self.rows.len() {
                return Ok(None);
            }
            let end = (self.cursor + max_rows).min(self.rows.len());
            let batch = self.rows[self.cursor..end].to_vec();
            self.cursor = end;
            Ok(Some(batch))
        }
    }

    #[test]
    fn test_null_in_float_column_becomes_zero() {
        init_logs();
        // 3 batches of 2 rows each (chunksize=2); the null sits in batch 2.
        let rows: Vec<Vec<Cell>> = vec![
            vec![Cell::Str("a".into()), Cell::Float(1.0)],
            vec![Cell::Str("b".into()), Cell::Float(2.0)],
            vec![Cell::Str("c".into()), Cell::Null],
            vec![Cell::Str("d".into()), Cell::Float(4.0)],
            vec![Cell::Str("e".into()), Cell::Float(5.0)],
            vec![Cell::Str("f".into()), Cell::Float(6.0)],
        ];
        let mut stream = VecStream::new(&["user", "amount"], rows);
        let mut dtypes = HashMap::new();
        dtypes.insert("amount".to_string(), CarouselDataType::Float64);

        let savedir = tempfile::tempdir().unwrap();
        let table = fetch_chunkwise(&mut stream, 2, &dtypes, &[], savedir.path()).unwrap();

        assert_eq!(table.num_rows().unwrap(), 6);
        let amounts = table.evaluate("amount").unwrap();
        let amounts = amounts.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(amounts.values(), &[1.0, 2.0, 0.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_droplist_and_passthrough_columns() {
        init_logs();
        let rows: Vec<Vec<Cell>> = vec![
            vec![Cell::Int(1), Cell::Str("x".into()), Cell::Null],
            vec![Cell::Int(2), Cell::Str("y".into()), Cell::Str("z".into())],
        ];
        let mut stream = VecStream::new(&["event_id", "user", "note"], rows);
        let savedir = tempfile::tempdir().unwrap();
        let table = fetch_chunkwise(
            &mut stream,
            10,
            &HashMap::new(),
            &["event_id".into()],
            savedir.path(),
        )
        .unwrap();

        assert_eq!(table.column_names(), vec!["user", "note"]);
        // Pass-through columns keep their own nulls.
        let notes = table.evaluate("note").unwrap();
        assert_eq!(notes.null_count(), 1);
    }

    #[test]
    fn test_temp_dir_removed_with_table() {
        init_logs();
        let rows = vec![vec![Cell::Int(1)], vec![Cell::Int(2)]];
        let mut stream = VecStream::new(&["v"], rows);
        let savedir = tempfile::tempdir().unwrap();
        let table =
            fetch_chunkwise(&mut stream, 1, &HashMap::new(), &[], savedir.path()).unwrap();
        let tempdir = savedir.path().join(TEMPDIR);
        assert!(tempdir.exists());
        drop(table);
        assert!(!tempdir.exists());
    }
}
