// In: src/store/mod.rs

//! The intermediate chunk store: filesystem helpers, natural-order file
//! sorting, the chunk writer/loader pair, and the streaming ingestor that
//! drives them.

use std::path::{Path, PathBuf};

use crate::error::CarouselError;

pub mod chunk_loader;
pub mod chunk_writer;
pub mod ingest;

pub use chunk_loader::ChunkSet;
pub use ingest::{fetch_chunkwise, RowStream};

/// File extension of persisted chunk files.
pub const CHUNK_EXT: &str = "ipc";

//==================================================================================
// 1. Filesystem Helpers
//==================================================================================

/// Creates `path` (and parents) if it does not exist.
pub fn safe_dir(path: &Path) -> Result<(), CarouselError> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Removes a directory tree if it exists.
pub fn safe_rmtree(path: &Path) -> Result<(), CarouselError> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

//==================================================================================
// 2. Natural-Order Sorting
//==================================================================================

/// One token of an alphanumeric sort key. Digit runs compare as integers,
/// so chunk "10" sorts after chunk "2".
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortToken {
    Num(u64),
    Text(String),
}

fn alphanum_key(s: &str) -> Vec<SortToken> {
    let mut tokens = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                tokens.push(SortToken::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                flush_digits(&mut tokens, &mut digits);
            }
            text.push(ch);
        }
    }
    if !digits.is_empty() {
        flush_digits(&mut tokens, &mut digits);
    }
    if !text.is_empty() {
        tokens.push(SortToken::Text(text));
    }
    tokens
}

fn flush_digits(tokens: &mut Vec<SortToken>, digits: &mut String) {
    let run = std::mem::take(digits);
    match run.parse::<u64>() {
        Ok(n) => tokens.push(SortToken::Num(n)),
        // Absurdly long digit runs fall back to text comparison.
        Err(_) => tokens.push(SortToken::Text(run)),
    }
}

/// Sorts paths by the natural (numeric-aware) order of their file names.
pub fn natural_sort(paths: &mut [PathBuf]) {
    paths.sort_by_key(|p| {
        alphanum_key(
            &p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_sort_numeric_runs() {
        let mut paths: Vec<PathBuf> = ["10.ipc", "2.ipc", "1.ipc"]
            .iter()
            .map(PathBuf::from)
            .collect();
        natural_sort(&mut paths);
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.ipc", "2.ipc", "10.ipc"]);
    }

    #[test]
    fn test_natural_sort_mixed_names() {
        let mut paths: Vec<PathBuf> = ["chunk_12.ipc", "chunk_2.ipc", "chunk_1.ipc"]
            .iter()
            .map(PathBuf::from)
            .collect();
        natural_sort(&mut paths);
        assert_eq!(paths[0], PathBuf::from("chunk_1.ipc"));
        assert_eq!(paths[2], PathBuf::from("chunk_12.ipc"));
    }
}
