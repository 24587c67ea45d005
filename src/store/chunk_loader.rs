// In: src/store/chunk_loader.rs

//! The chunked table loader: discovers persisted chunk files, orders them by
//! a natural (numeric-aware) sort of their file names, and exposes them as
//! one concatenated column source. No chunk data is read at open time; reads
//! happen per column, on demand, with a projection so only the requested
//! column is decoded.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use arrow::array::ArrayRef;
use arrow::compute;
use arrow::ipc::reader::FileReader;
use arrow_schema::SchemaRef;
use log::{debug, info};

use crate::error::CarouselError;
use crate::store::{natural_sort, CHUNK_EXT};
use crate::table::LogicalTable;

//==================================================================================
// 1. ChunkSet
//==================================================================================

/// An ordered set of persisted chunk files forming one logical column source.
///
/// When `cleanup` is set the containing directory is removed once the last
/// reference drops, never before, so lazy reads stay valid for the whole
/// lifetime of the tables assembled from this set.
#[derive(Debug)]
pub struct ChunkSet {
    dir: PathBuf,
    files: Vec<PathBuf>,
    schema: SchemaRef,
    chunk_rows: OnceLock<Vec<usize>>,
    cleanup: bool,
}

impl ChunkSet {
    /// Discovers chunk files under `dir` and validates the schema from the
    /// first chunk's footer. Fails with `MissingData` when no chunk files
    /// are found.
    pub fn open(dir: &Path, cleanup: bool) -> Result<Arc<Self>, CarouselError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == CHUNK_EXT).unwrap_or(false))
            .collect();
        if files.is_empty() {
            return Err(CarouselError::MissingData(dir.display().to_string()));
        }
        natural_sort(&mut files);

        // Footer-only open; batch payloads stay on disk.
        let first = FileReader::try_new(File::open(&files[0])?, None)?;
        let schema = first.schema();
        info!("opened {} chunk file(s) under {}", files.len(), dir.display());

        Ok(Arc::new(ChunkSet {
            dir: dir.to_path_buf(),
            files,
            schema,
            chunk_rows: OnceLock::new(),
            cleanup,
        }))
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn num_chunks(&self) -> usize {
        self.files.len()
    }

    /// Total row count across all chunks. Resolved on first use by scanning
    /// the narrowest projection (a single column) of each chunk.
    pub fn total_rows(&self) -> Result<usize, CarouselError> {
        Ok(self.rows_per_chunk()?.iter().sum())
    }

    fn rows_per_chunk(&self) -> Result<&[usize], CarouselError> {
        if self.chunk_rows.get().is_none() {
            let mut counts = Vec::with_capacity(self.files.len());
            for path in &self.files {
                let reader = FileReader::try_new(File::open(path)?, Some(vec![0]))?;
                let mut rows = 0usize;
                for batch in reader {
                    rows += batch?.num_rows();
                }
                counts.push(rows);
            }
            let _ = self.chunk_rows.set(counts);
        }
        self.chunk_rows
            .get()
            .map(|v| v.as_slice())
            .ok_or_else(|| CarouselError::InternalError("Row-count cache poisoned".into()))
    }

    /// Reads one column across every chunk, concatenated in ascending
    /// sequence order. Chunks whose stored dtype drifted from the set schema
    /// (e.g. an all-null inferred column) are cast back to the schema dtype.
    pub fn read_column(&self, name: &str) -> Result<ArrayRef, CarouselError> {
        let target = self
            .schema
            .field_with_name(name)
            .map_err(|_| CarouselError::ColumnNotFound(name.to_string()))?
            .data_type()
            .clone();

        let mut parts: Vec<ArrayRef> = Vec::with_capacity(self.files.len());
        for path in &self.files {
            // The footer gives us this file's own column index for `name`.
            let probe = FileReader::try_new(File::open(path)?, None)?;
            let idx = probe
                .schema()
                .index_of(name)
                .map_err(|_| CarouselError::ColumnNotFound(name.to_string()))?;
            drop(probe);

            let reader = FileReader::try_new(File::open(path)?, Some(vec![idx]))?;
            for batch in reader {
                let column = batch?.column(0).clone();
                if column.data_type() != &target {
                    parts.push(compute::cast(&column, &target)?);
                } else {
                    parts.push(column);
                }
            }
        }
        debug!("read column '{}' from {} chunk(s)", name, parts.len());
        let refs: Vec<&dyn arrow::array::Array> =
            parts.iter().map(|a| a.as_ref()).collect();
        Ok(compute::concat(&refs)?)
    }
}

impl Drop for ChunkSet {
    fn drop(&mut self) {
        if self.cleanup {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                log::warn!("failed to remove chunk dir {}: {}", self.dir.display(), e);
            }
        }
    }
}

//==================================================================================
// 2. Loader Entry Point
//==================================================================================

/// Opens a chunk directory as one lazily-evaluated logical table.
pub fn load_chunks(dir: &Path, cleanup: bool) -> Result<LogicalTable, CarouselError> {
    let set = ChunkSet::open(dir, cleanup)?;
    Ok(LogicalTable::from_chunks(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::chunk_writer::write_chunk_from_columns;
    use arrow::array::{ArrayRef, Int64Array};
    use std::sync::Arc as StdArc;

    fn write_numbered_chunks(dir: &Path, ids: &[&str]) {
        for (offset, id) in ids.iter().enumerate() {
            write_numbered_chunk(dir, id, offset as i64 * 10);
        }
    }

    fn write_numbered_chunk(dir: &Path, id: &str, start: i64) {
        write_chunk_from_columns(
            vec![(
                "v".into(),
                StdArc::new(Int64Array::from(vec![start, start + 1])) as ArrayRef,
            )],
            &dir.join(format!("{}.ipc", id)),
            &[],
        )
        .unwrap();
    }

    #[test]
    fn test_missing_data_error_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        match ChunkSet::open(dir.path(), false) {
            Err(CarouselError::MissingData(_)) => {}
            other => panic!("expected MissingData, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_chunks_concatenate_in_natural_order() {
        let dir = tempfile::tempdir().unwrap();
        // Written out of order on purpose; "10" must land after "2".
        write_numbered_chunk(dir.path(), "10", 100);
        write_numbered_chunk(dir.path(), "2", 20);
        write_numbered_chunk(dir.path(), "1", 10);

        let set = ChunkSet::open(dir.path(), false).unwrap();
        assert_eq!(set.num_chunks(), 3);
        assert_eq!(set.total_rows().unwrap(), 6);

        let col = set.read_column("v").unwrap();
        let col = col.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(col.values(), &[10, 11, 20, 21, 100, 101]);
    }

    #[test]
    fn test_row_counts_survive_uneven_random_chunks() {
        use arrow::array::Float64Array;
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut expected = Vec::new();
        for chunk in 0..12 {
            let rows = rng.gen_range(1..=50);
            let values: Vec<f64> = (0..rows).map(|_| rng.gen::<f64>()).collect();
            expected.extend_from_slice(&values);
            write_chunk_from_columns(
                vec![("v".into(), StdArc::new(Float64Array::from(values)) as ArrayRef)],
                &dir.path().join(format!("{}.ipc", chunk)),
                &[],
            )
            .unwrap();
        }

        let set = ChunkSet::open(dir.path(), false).unwrap();
        assert_eq!(set.total_rows().unwrap(), expected.len());

        let col = set.read_column("v").unwrap();
        let col = col.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(col.values(), expected.as_slice());
    }

    #[test]
    fn test_cleanup_removes_dir_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join(".temp");
        std::fs::create_dir(&dir).unwrap();
        write_numbered_chunks(&dir, &["0", "1"]);

        let set = ChunkSet::open(&dir, true).unwrap();
        assert!(dir.exists());
        drop(set);
        assert!(!dir.exists());
    }
}
