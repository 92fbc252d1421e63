//! `Indexer` — the four-phase orchestrator that turns a root set into a new
//! generation of vectors: scanning, pruning, embedding, finalizing
//! (spec.md §4.2–§4.4, §4.7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, ServiceConfig};
use crate::embedding::EmbeddingBackend;
use crate::error::IndexerError;
use crate::job::JobPhase;
use crate::meta_store::MetaStore;
use crate::vector_store::VectorStore;
use crate::walker::PathWalker;

pub struct IndexerOutcome {
    pub scanned: usize,
    pub embedded: usize,
    pub carried_forward: usize,
    pub dim: usize,
}

pub struct Indexer<'a> {
    backend: &'a dyn EmbeddingBackend,
    config: &'a ServiceConfig,
}

impl<'a> Indexer<'a> {
    pub fn new(backend: &'a dyn EmbeddingBackend, config: &'a ServiceConfig) -> Self {
        Self { backend, config }
    }

    fn check_cancelled(stop_signal: &AtomicBool) -> Result<(), IndexerError> {
        if stop_signal.load(Ordering::Relaxed) {
            Err(IndexerError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn mtime_secs(path: &Path) -> std::io::Result<f64> {
        let meta = std::fs::metadata(path)?;
        let modified = meta.modified()?;
        Ok(modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0))
    }

    /// Run one full indexing pass. `meta` is the writer connection; `on_progress`
    /// is called periodically with `(phase, processed, total)`.
    pub fn run(
        &self,
        roots: &[PathBuf],
        meta: &MetaStore,
        stop_signal: &AtomicBool,
        mut on_progress: impl FnMut(JobPhase, usize, usize),
    ) -> Result<IndexerOutcome, IndexerError> {
        // --- Phase 1: scanning ---
        info!(roots = roots.len(), "scanning roots");
        let found = PathWalker::walk(roots);
        let total = found.len();
        on_progress(JobPhase::Scanning, 0, total);
        Self::check_cancelled(stop_signal)?;

        let old_ids = VectorStore::load_ids(&self.config.store_dir).unwrap_or_default();
        let old_index: HashMap<PathBuf, usize> =
            old_ids.into_iter().enumerate().map(|(i, p)| (p, i)).collect();

        let mut live_paths = std::collections::HashSet::with_capacity(found.len());
        let mut to_embed: Vec<(PathBuf, PathBuf, f64)> = Vec::new();
        let mut carried: Vec<(PathBuf, usize)> = Vec::new();

        meta.begin()?;
        for (scanned, (root, path)) in found.iter().enumerate() {
            live_paths.insert(path.clone());
            let mtime = match Self::mtime_secs(path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            if meta.is_up_to_date(path, mtime)? {
                if let Some(&old_row) = old_index.get(path) {
                    carried.push((path.clone(), old_row));
                    continue;
                }
            }
            to_embed.push((path.clone(), root.clone(), mtime));

            if scanned % self.config.commit_every == 0 && scanned > 0 {
                meta.commit()?;
                meta.begin()?;
            }
            if scanned % self.config.progress_every == 0 {
                on_progress(JobPhase::Scanning, scanned, total);
                Self::check_cancelled(stop_signal).inspect_err(|_| {
                    let _ = meta.rollback();
                })?;
            }
        }
        meta.commit()?;

        // --- Phase 2: pruning ---
        let removed = meta.delete_missing(&live_paths)?;
        debug!(removed, "pruned stale rows");

        // --- Phase 3: embedding ---
        let dim = self.backend.dim();
        let mut fresh: Vec<(PathBuf, PathBuf, Vec<f32>, u32, u32)> = Vec::new();
        let mut embedded = 0usize;

        for (batch_idx, chunk) in to_embed.chunks(self.config.batch_size.max(1)).enumerate() {
            Self::check_cancelled(stop_signal)?;

            // Decoding/resizing is CPU-bound and independent per file; the
            // embedding call itself is what's serialized behind the backend's lock.
            let decoded: Vec<_> = chunk
                .par_iter()
                .map(|(path, root, mtime)| {
                    self.backend
                        .preprocess(path)
                        .map(|p| (path.clone(), root.clone(), *mtime, p))
                        .map_err(|e| (path.clone(), e))
                })
                .collect();

            let mut prepared = Vec::with_capacity(decoded.len());
            let mut kept = Vec::with_capacity(decoded.len());
            for outcome in decoded {
                match outcome {
                    Ok((path, root, mtime, image)) => {
                        kept.push((path, root, mtime, image.width, image.height));
                        prepared.push(image);
                    }
                    Err((path, e)) => warn!(path = %path.display(), error = %e, "preprocess failed, skipping"),
                }
            }
            if prepared.is_empty() {
                continue;
            }
            let vectors = self.backend.embed_images(&prepared)?;
            meta.begin()?;
            for ((path, root, mtime, width, height), vector) in kept.into_iter().zip(vectors) {
                meta.upsert(&path, &root, width, height, mtime)?;
                fresh.push((path, root, vector, width, height));
                embedded += 1;
            }
            meta.commit()?;

            on_progress(JobPhase::Embedding, batch_idx * self.config.batch_size, to_embed.len());
        }

        if embedded == 0 && carried.is_empty() {
            return Err(IndexerError::NoEmbeddingsProduced);
        }

        // --- Phase 4: finalizing (non-cancellable) ---
        on_progress(JobPhase::Finalizing, 0, 0);
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(carried.len() + fresh.len());
        let mut ids: Vec<PathBuf> = Vec::with_capacity(carried.len() + fresh.len());

        for (path, old_row) in &carried {
            let row = VectorStore::read_row_from(&self.config.store_dir, *old_row)
                .map_err(IndexerError::VectorStore)?;
            rows.push(row);
            ids.push(path.clone());
        }
        for (path, _root, vector, _w, _h) in &fresh {
            rows.push(vector.clone());
            ids.push(path.clone());
        }

        VectorStore::publish(&self.config.store_dir, dim, &rows, &ids)?;

        let cfg = Config {
            model_name: self.config.model_name.clone(),
            dim,
            created_at: now(),
            roots: roots.to_vec(),
        };
        cfg.write_atomic(&self.config.config_path())
            .map_err(crate::error::VectorStoreError::Io)?;

        info!(scanned = total, embedded, carried_forward = carried.len(), "indexing finished");
        Ok(IndexerOutcome { scanned: total, embedded, carried_forward: carried.len(), dim })
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockBackend;

    fn write_test_image(path: &Path, w: u32, h: u32) {
        let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([x as u8, y as u8, 0]));
        img.save(path).unwrap();
    }

    #[test]
    fn full_pass_embeds_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("photos");
        std::fs::create_dir_all(&root).unwrap();
        write_test_image(&root.join("a.jpg"), 10, 10);
        write_test_image(&root.join("b.png"), 20, 10);

        let store_dir = dir.path().join("store");
        let mut config = ServiceConfig::default();
        config.store_dir = store_dir.clone();
        config.batch_size = 8;
        config.commit_every = 50;
        config.progress_every = 1;

        let backend = MockBackend::new(8);
        let indexer = Indexer::new(&backend, &config);
        let meta = MetaStore::open(&config.meta_db_path(), config.busy_timeout_ms).unwrap();
        let stop = AtomicBool::new(false);

        let outcome = indexer.run(&[root.clone()], &meta, &stop, |_, _, _| {}).unwrap();
        assert_eq!(outcome.scanned, 2);
        assert_eq!(outcome.embedded, 2);
        assert_eq!(outcome.carried_forward, 0);

        let matrix = VectorStore::load(&store_dir).unwrap();
        assert_eq!(matrix.rows.len(), 2);
        assert!(config.config_path().exists());
    }

    #[test]
    fn second_pass_carries_forward_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("photos");
        std::fs::create_dir_all(&root).unwrap();
        write_test_image(&root.join("a.jpg"), 10, 10);

        let store_dir = dir.path().join("store");
        let mut config = ServiceConfig::default();
        config.store_dir = store_dir;
        config.progress_every = 1;
        let backend = MockBackend::new(8);
        let indexer = Indexer::new(&backend, &config);
        let meta = MetaStore::open(&config.meta_db_path(), config.busy_timeout_ms).unwrap();
        let stop = AtomicBool::new(false);

        indexer.run(&[root.clone()], &meta, &stop, |_, _, _| {}).unwrap();
        let second = indexer.run(&[root.clone()], &meta, &stop, |_, _, _| {}).unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.carried_forward, 1);
    }

    #[test]
    fn empty_root_fails_with_no_embeddings_produced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("empty");
        std::fs::create_dir_all(&root).unwrap();

        let mut config = ServiceConfig::default();
        config.store_dir = dir.path().join("store");
        let backend = MockBackend::new(8);
        let indexer = Indexer::new(&backend, &config);
        let meta = MetaStore::open(&config.meta_db_path(), config.busy_timeout_ms).unwrap();
        let stop = AtomicBool::new(false);

        let result = indexer.run(&[root], &meta, &stop, |_, _, _| {});
        assert!(matches!(result, Err(IndexerError::NoEmbeddingsProduced)));
        assert!(!config.config_path().exists(), "no artifacts should be written on empty-result failure");
    }
}
