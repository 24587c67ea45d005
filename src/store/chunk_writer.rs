// In: src/store/chunk_writer.rs

//! The chunk writer: converts one in-memory row batch into a self-contained,
//! column-typed Arrow IPC file. This is the only place the pipeline writes
//! to disk, and the batch buffers are released as soon as the file is
//! finished so peak memory stays bounded during long ingestions.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use regex::Regex;

use crate::error::CarouselError;

/// Columns whose names carry an automatic duplicate-rename suffix
/// (`name.1`, `name.2`, ...) produced by upstream duplicate-column
/// resolution. They never carry real data and are dropped before writing.
fn duplicate_suffixed(batch: &RecordBatch) -> Result<Vec<String>, CarouselError> {
    let re = Regex::new(r"\.\d+$")
        .map_err(|e| CarouselError::InternalError(format!("Bad dedup pattern: {}", e)))?;
    Ok(batch
        .schema()
        .fields()
        .iter()
        .filter(|f| re.is_match(f.name()))
        .map(|f| f.name().clone())
        .collect())
}

/// Persists one batch as a single chunk file at `path`.
///
/// The drop list is extended with duplicate-suffixed columns before the
/// projection is taken. The batch is consumed; its buffers are dropped on
/// return.
pub fn write_chunk(
    batch: RecordBatch,
    path: &Path,
    droplist: &[String],
) -> Result<(), CarouselError> {
    let mut drops = droplist.to_vec();
    drops.extend(duplicate_suffixed(&batch)?);

    let keep: Vec<usize> = batch
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !drops.contains(f.name()))
        .map(|(i, _)| i)
        .collect();
    let projected = batch.project(&keep)?;

    info!("exporting chunk to {}", path.display());
    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, projected.schema().as_ref())?;
    writer.write(&projected)?;
    writer.finish()?;

    // Release batch memory before the next chunk is pulled.
    drop(projected);
    drop(batch);
    debug!("chunk written, buffers released");
    Ok(())
}

/// Convenience: builds a batch from named arrays and writes it.
pub fn write_chunk_from_columns(
    columns: Vec<(String, arrow::array::ArrayRef)>,
    path: &Path,
    droplist: &[String],
) -> Result<(), CarouselError> {
    let fields: Vec<arrow_schema::Field> = columns
        .iter()
        .map(|(name, array)| arrow_schema::Field::new(name, array.data_type().clone(), true))
        .collect();
    let arrays: Vec<arrow::array::ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
    let batch = RecordBatch::try_new(Arc::new(arrow_schema::Schema::new(fields)), arrays)?;
    write_chunk(batch, path, droplist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, Int64Array};
    use arrow::ipc::reader::FileReader;

    #[test]
    fn test_duplicate_suffixed_columns_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.ipc");
        write_chunk_from_columns(
            vec![
                (
                    "amount".into(),
                    std::sync::Arc::new(Float64Array::from(vec![1.0])) as ArrayRef,
                ),
                (
                    "amount.1".into(),
                    std::sync::Arc::new(Float64Array::from(vec![1.0])) as ArrayRef,
                ),
                (
                    "event_id".into(),
                    std::sync::Arc::new(Int64Array::from(vec![7])) as ArrayRef,
                ),
            ],
            &path,
            &["event_id".into()],
        )
        .unwrap();

        let reader = FileReader::try_new(std::fs::File::open(&path).unwrap(), None).unwrap();
        let names: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["amount"]);
    }
}
