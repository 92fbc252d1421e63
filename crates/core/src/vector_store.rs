//! `VectorStore` — durable storage for the embedding matrix and its id list
//! (spec.md §4.4, §6.3).
//!
//! Layout inside the store directory:
//!   `vectors.bin` — `[n:u32 LE][dim:u32 LE]` header followed by `n*dim` row-major f32
//!   `ids.json`    — `Vec<String>` of absolute paths, `ids[i]` names row `i`
//!   `index.bin`   — mirrors `vectors.bin`; the published artifact, loaded in
//!                   preference to `vectors.bin` when both exist
//!   `config.json` — written last; its presence is the commit point (see [`crate::config::Config`])

use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::VectorStoreError;

const HEADER_BYTES: usize = 8;

/// A loaded embedding matrix: `n` rows of `dim` f32 each, row-major.
pub struct Matrix {
    pub dim: usize,
    pub rows: Vec<Vec<f32>>,
}

pub struct VectorStore;

impl VectorStore {
    /// Load the published matrix, preferring `index.bin` over `vectors.bin`.
    /// Returns `Err(Absent)` if neither file exists.
    pub fn load(store_dir: &Path) -> Result<Matrix, VectorStoreError> {
        let index_path = store_dir.join("index.bin");
        let vectors_path = store_dir.join("vectors.bin");
        let path = if index_path.exists() {
            index_path
        } else if vectors_path.exists() {
            vectors_path
        } else {
            return Err(VectorStoreError::Absent);
        };
        Self::load_file(&path)
    }

    fn load_file(path: &Path) -> Result<Matrix, VectorStoreError> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_BYTES {
            return Err(VectorStoreError::Corrupt { expected: HEADER_BYTES, found: mmap.len() });
        }
        let n = u32::from_le_bytes(mmap[0..4].try_into().unwrap()) as usize;
        let dim = u32::from_le_bytes(mmap[4..8].try_into().unwrap()) as usize;
        let expected = HEADER_BYTES + n * dim * 4;
        if mmap.len() != expected {
            return Err(VectorStoreError::Corrupt { expected, found: mmap.len() });
        }

        let mut rows = Vec::with_capacity(n);
        for i in 0..n {
            rows.push(read_row(&mmap, i, dim));
        }
        Ok(Matrix { dim, rows })
    }

    /// Read a single row out of the published matrix without loading the
    /// rest, used by the indexer's carry-forward path to copy an unchanged
    /// image's embedding into the next generation's matrix.
    pub fn read_row_from(store_dir: &Path, row: usize) -> Result<Vec<f32>, VectorStoreError> {
        let index_path = store_dir.join("index.bin");
        let vectors_path = store_dir.join("vectors.bin");
        let path = if index_path.exists() { index_path } else { vectors_path };
        let file = std::fs::File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_BYTES {
            return Err(VectorStoreError::Corrupt { expected: HEADER_BYTES, found: mmap.len() });
        }
        let n = u32::from_le_bytes(mmap[0..4].try_into().unwrap()) as usize;
        let dim = u32::from_le_bytes(mmap[4..8].try_into().unwrap()) as usize;
        if row >= n {
            return Err(VectorStoreError::Corrupt { expected: (row + 1) * dim, found: n * dim });
        }
        Ok(read_row(&mmap, row, dim))
    }

    /// Write `rows` + `ids` as the new generation: `vectors.bin`, `ids.json`,
    /// then `index.bin` — each via tmp-file + rename. `config.json` is
    /// written separately, last, by the caller (see [`crate::config::Config::write_atomic`]).
    pub fn publish(
        store_dir: &Path,
        dim: usize,
        rows: &[Vec<f32>],
        ids: &[PathBuf],
    ) -> Result<(), VectorStoreError> {
        std::fs::create_dir_all(store_dir)?;
        let bytes = encode(dim, rows);

        write_atomic(&store_dir.join("vectors.bin"), &bytes)?;
        let ids_json = serde_json::to_vec(ids)?;
        write_atomic(&store_dir.join("ids.json"), &ids_json)?;
        write_atomic(&store_dir.join("index.bin"), &bytes)?;
        Ok(())
    }

    pub fn load_ids(store_dir: &Path) -> Result<Vec<PathBuf>, VectorStoreError> {
        let raw = std::fs::read_to_string(store_dir.join("ids.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn read_row(mmap: &Mmap, row: usize, dim: usize) -> Vec<f32> {
    let start = HEADER_BYTES + row * dim * 4;
    let mut out = Vec::with_capacity(dim);
    for i in 0..dim {
        let off = start + i * 4;
        out.push(f32::from_le_bytes(mmap[off..off + 4].try_into().unwrap()));
    }
    out
}

fn encode(dim: usize, rows: &[Vec<f32>]) -> Vec<u8> {
    let n = rows.len();
    let mut out = Vec::with_capacity(HEADER_BYTES + n * dim * 4);
    out.extend_from_slice(&(n as u32).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    for row in rows {
        debug_assert_eq!(row.len(), dim);
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
    ));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let ids = vec![PathBuf::from("/a.jpg"), PathBuf::from("/b.jpg")];
        VectorStore::publish(dir.path(), 3, &rows, &ids).unwrap();

        let matrix = VectorStore::load(dir.path()).unwrap();
        assert_eq!(matrix.dim, 3);
        assert_eq!(matrix.rows, rows);
        assert_eq!(VectorStore::load_ids(dir.path()).unwrap(), ids);
    }

    #[test]
    fn read_row_matches_full_load() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let ids: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("/{i}.jpg"))).collect();
        VectorStore::publish(dir.path(), 2, &rows, &ids).unwrap();
        assert_eq!(VectorStore::read_row_from(dir.path(), 1).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn absent_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(VectorStore::load(dir.path()), Err(VectorStoreError::Absent)));
    }
}
