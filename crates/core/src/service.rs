//! `IndexService` — the process-wide façade (spec.md §5, §4.7).
//!
//! Owns the published `(index, ids, meta_conn)` triple behind a swap lock,
//! schedules at most one [`Indexer`] job at a time on a background thread,
//! and answers similarity queries over whatever generation is currently
//! published. Callers never see a half-written generation: the swap only
//! happens after [`Indexer::run`] returns successfully.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use uuid::Uuid;

use crate::config::{Config, ServiceConfig};
use crate::embedding::EmbeddingBackend;
use crate::error::{ServiceError, VectorStoreError};
use crate::indexer::Indexer;
use crate::job::{JobPhase, JobRecord, JobState};
use crate::meta_store::{MetaStore, Orientation};
pub use crate::meta_store::RootFolders;
use crate::numpy_index::NumpyIndex;
use crate::root_set::RootSet;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub orientation: Option<Orientation>,
    pub folder: Option<String>,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    pub score: f32,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub folder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderBreakdown {
    pub roots: Vec<RootFolders>,
    pub total_images: usize,
}

/// Outcome of [`IndexService::remove_roots`] (spec.md §6.2 `/remove_roots`).
#[derive(Debug, Clone, Serialize)]
pub struct RemoveRootsOutcome {
    pub state: &'static str,
    pub removed: Vec<PathBuf>,
    pub roots: Vec<PathBuf>,
}

/// Snapshot returned by [`IndexService::ready_info`] (spec.md §6.2 `/ready`).
#[derive(Debug, Clone, Serialize)]
pub struct ReadyInfo {
    pub ok: bool,
    pub indexed: usize,
    pub has_index: bool,
    pub dim: usize,
    pub device: String,
}

struct Published {
    index: NumpyIndex,
    ids: Vec<PathBuf>,
    meta: Mutex<MetaStore>,
}

struct JobHandle {
    record: Arc<Mutex<JobRecord>>,
    stop_signal: Arc<AtomicBool>,
    #[allow(dead_code)]
    thread: std::thread::JoinHandle<()>,
}

pub struct IndexService {
    config: ServiceConfig,
    backend: Arc<dyn EmbeddingBackend>,
    published: RwLock<Option<Published>>,
    roots: RwLock<Vec<PathBuf>>,
    job: Mutex<Option<JobHandle>>,
}

impl IndexService {
    pub fn new(config: ServiceConfig, backend: Arc<dyn EmbeddingBackend>) -> Result<Arc<Self>, ServiceError> {
        std::fs::create_dir_all(&config.store_dir)?;
        let roots = Config::load(&config.config_path()).map(|c| c.roots).unwrap_or_default();

        let published = match VectorStore::load(&config.store_dir) {
            Ok(matrix) => {
                let ids = VectorStore::load_ids(&config.store_dir)?;
                let meta = MetaStore::open(&config.meta_db_path(), config.busy_timeout_ms)?;
                Some(Published { index: NumpyIndex::build(matrix.dim, matrix.rows), ids, meta: Mutex::new(meta) })
            }
            Err(VectorStoreError::Absent) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Arc::new(Self {
            config,
            backend,
            published: RwLock::new(published),
            roots: RwLock::new(roots),
            job: Mutex::new(None),
        }))
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().unwrap().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.published.read().unwrap().is_some()
    }

    /// The embedding backend's device string, for `/ready`.
    pub fn device(&self) -> &str {
        self.backend.device()
    }

    /// Snapshot for `/ready` (spec.md §6.2): `{ok, indexed, has_index, dim, device}`.
    pub fn ready_info(&self) -> ReadyInfo {
        let guard = self.published.read().unwrap();
        match guard.as_ref() {
            Some(published) => ReadyInfo {
                ok: true,
                indexed: published.index.len(),
                has_index: true,
                dim: published.index.dim(),
                device: self.device().to_string(),
            },
            None => ReadyInfo { ok: true, indexed: 0, has_index: false, dim: 0, device: self.device().to_string() },
        }
    }

    /// Metadata for a single indexed path, used by the HTTP layer's
    /// `/thumb` and `/open_path` handlers to reject paths that were never
    /// indexed before touching the filesystem on their behalf.
    pub fn meta_for(&self, path: &Path) -> Result<crate::meta_store::ImageMeta, ServiceError> {
        let guard = self.published.read().unwrap();
        let published = guard.as_ref().ok_or(ServiceError::NoIndex)?;
        let meta = published.meta.lock().unwrap().get_meta(path).map_err(|_| ServiceError::PathNotIndexed(path.to_path_buf()))?;
        Ok(meta)
    }

    /// Unlike [`Self::search_text`]/[`Self::search_image`], an absent index is
    /// not an error here: an empty corpus has a well-defined, empty folder
    /// breakdown rather than a "not ready yet" failure.
    pub fn folders(&self) -> Result<FolderBreakdown, ServiceError> {
        let guard = self.published.read().unwrap();
        let Some(published) = guard.as_ref() else {
            return Ok(FolderBreakdown { roots: Vec::new(), total_images: 0 });
        };
        let roots = published.meta.lock().unwrap().folders_by_root()?;
        let total_images = roots.iter().map(|r| r.count).sum();
        Ok(FolderBreakdown { roots, total_images })
    }

    pub fn search_text(&self, query: &str, k: usize, filters: &Filters) -> Result<Vec<SearchHit>, ServiceError> {
        let mut vectors =
            self.backend.embed_texts(&[query.to_string()]).map_err(ServiceError::Embedding)?;
        self.search_by_vector(vectors.pop().unwrap_or_default(), k, filters)
    }

    pub fn search_image(&self, bytes: &[u8], k: usize, filters: &Filters) -> Result<Vec<SearchHit>, ServiceError> {
        let tmp = std::env::temp_dir().join(format!("imagefinder-query-{}.bin", Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        let prepared = self.backend.preprocess(&tmp);
        let _ = std::fs::remove_file(&tmp);
        let prepared = prepared.map_err(ServiceError::Embedding)?;
        let mut vectors = self.backend.embed_images(&[prepared]).map_err(ServiceError::Embedding)?;
        self.search_by_vector(vectors.pop().unwrap_or_default(), k, filters)
    }

    fn search_by_vector(&self, vector: Vec<f32>, k: usize, filters: &Filters) -> Result<Vec<SearchHit>, ServiceError> {
        let guard = self.published.read().unwrap();
        let published = guard.as_ref().ok_or(ServiceError::NoIndex)?;
        if published.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let scored = published.index.search(&vector, published.index.len());
        let mut hits = Vec::with_capacity(k.min(scored.len()));
        for (score, idx) in scored {
            if idx < 0 || hits.len() >= k {
                break;
            }
            let path = &published.ids[idx as usize];
            let meta = match published.meta.lock().unwrap().get_meta(path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if let Some(root) = &filters.root {
                if !path.starts_with(root) {
                    continue;
                }
            }
            if let Some(folder) = &filters.folder {
                if &meta.folder != folder {
                    continue;
                }
            }
            if let Some(orientation) = filters.orientation {
                if meta.orientation != orientation {
                    continue;
                }
            }
            hits.push(SearchHit {
                path: path.clone(),
                score,
                width: meta.width,
                height: meta.height,
                orientation: meta.orientation,
                folder: meta.folder,
            });
        }
        Ok(hits)
    }

    /// Schedule a reindex. `merge = true` unions `requested_roots` with the
    /// existing root set (the usual incremental case); `merge = false` uses
    /// `requested_roots` alone, discarding any root not named in the request
    /// (spec.md §6.2 "Reindex semantics" — also how `remove_roots` rebuilds
    /// over survivors with no merge). Fails if a job is already running, or
    /// if the effective root set would overlap.
    pub fn reindex(self: &Arc<Self>, requested_roots: Vec<PathBuf>, merge: bool) -> Result<Uuid, ServiceError> {
        {
            let job = self.job.lock().unwrap();
            if let Some(handle) = job.as_ref() {
                let record = handle.record.lock().unwrap();
                if !record.is_terminal() {
                    return Ok(record.job_id);
                }
            }
        }

        let normalized = requested_roots
            .iter()
            .map(|p| RootSet::normalize(p))
            .collect::<std::io::Result<Vec<_>>>()?;
        let existing = self.roots.read().unwrap().clone();
        RootSet::validate(&existing, &normalized)?;
        let effective = if merge {
            RootSet::minimal([existing, normalized].concat())
        } else {
            RootSet::minimal(normalized)
        };

        let job_id = Uuid::new_v4();
        let record = Arc::new(Mutex::new(JobRecord::new(job_id, chrono::Utc::now())));
        let stop_signal = Arc::new(AtomicBool::new(false));

        let service = Arc::clone(self);
        let record_for_thread = Arc::clone(&record);
        let stop_for_thread = Arc::clone(&stop_signal);
        let effective_roots = effective.clone();

        let thread = std::thread::spawn(move || {
            service.run_job(effective_roots, record_for_thread, stop_for_thread);
        });

        *self.job.lock().unwrap() = Some(JobHandle { record, stop_signal, thread });
        Ok(job_id)
    }

    fn run_job(
        self: Arc<Self>,
        roots: Vec<PathBuf>,
        record: Arc<Mutex<JobRecord>>,
        stop_signal: Arc<AtomicBool>,
    ) {
        let meta_writer = match MetaStore::open(&self.config.meta_db_path(), self.config.busy_timeout_ms) {
            Ok(m) => m,
            Err(e) => {
                Self::finish_with_error(&record, e.to_string());
                return;
            }
        };

        let indexer = Indexer::new(self.backend.as_ref(), &self.config);
        let result = indexer.run(&roots, &meta_writer, &stop_signal, |phase, processed, total| {
            let mut rec = record.lock().unwrap();
            rec.state = JobState::Running { phase };
            match phase {
                JobPhase::Scanning => rec.scanned = processed,
                JobPhase::Embedding => rec.embedded = processed,
                JobPhase::Finalizing => {}
            }
            rec.total = total;
        });
        drop(meta_writer);

        match result {
            Ok(outcome) => {
                if let Err(e) = self.swap_in_new_generation(&roots) {
                    Self::finish_with_error(&record, e.to_string());
                    return;
                }
                let mut rec = record.lock().unwrap();
                rec.scanned = outcome.scanned;
                rec.embedded = outcome.embedded;
                rec.state = JobState::Done;
                rec.finished_at = Some(chrono::Utc::now());
            }
            Err(crate::error::IndexerError::Cancelled) => {
                let mut rec = record.lock().unwrap();
                rec.state = JobState::Cancelled;
                rec.finished_at = Some(chrono::Utc::now());
            }
            Err(e) => Self::finish_with_error(&record, e.to_string()),
        }
    }

    fn swap_in_new_generation(&self, roots: &[PathBuf]) -> Result<(), ServiceError> {
        let matrix = VectorStore::load(&self.config.store_dir)?;
        let ids = VectorStore::load_ids(&self.config.store_dir)?;
        let meta = MetaStore::open(&self.config.meta_db_path(), self.config.busy_timeout_ms)?;
        *self.published.write().unwrap() =
            Some(Published { index: NumpyIndex::build(matrix.dim, matrix.rows), ids, meta: Mutex::new(meta) });
        *self.roots.write().unwrap() = roots.to_vec();
        Ok(())
    }

    fn finish_with_error(record: &Arc<Mutex<JobRecord>>, message: String) {
        let mut rec = record.lock().unwrap();
        rec.state = JobState::Error { message };
        rec.finished_at = Some(chrono::Utc::now());
    }

    pub fn reindex_status(&self) -> Result<JobRecord, ServiceError> {
        let job = self.job.lock().unwrap();
        let handle = job.as_ref().ok_or(ServiceError::JobNotRunning)?;
        let record = handle.record.lock().unwrap().clone();
        Ok(record)
    }

    pub fn cancel_index(&self, job_id: Uuid) -> Result<(), ServiceError> {
        let job = self.job.lock().unwrap();
        let handle = job.as_ref().ok_or(ServiceError::JobNotRunning)?;
        let record = handle.record.lock().unwrap();
        if record.job_id != job_id {
            return Err(ServiceError::JobIdMismatch);
        }
        if record.is_terminal() {
            return Err(ServiceError::JobNotRunning);
        }
        if !record.is_cancellable() {
            return Err(ServiceError::NotCancellable);
        }
        handle.stop_signal.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Drop roots from the root set (spec.md §4.7). If no survivors remain,
    /// wipe every artifact and the database rows and reset the triple;
    /// otherwise schedule a fresh indexing job over exactly the survivors,
    /// with no merge against the roots being dropped.
    pub fn remove_roots(self: &Arc<Self>, targets: &[PathBuf]) -> Result<RemoveRootsOutcome, ServiceError> {
        if targets.is_empty() {
            return Err(crate::error::RootSetError::Empty.into());
        }
        let normalized = targets
            .iter()
            .map(|p| RootSet::normalize(p))
            .collect::<std::io::Result<Vec<_>>>()?;

        let existing = self.roots.read().unwrap().clone();
        if existing.is_empty() {
            return Err(ServiceError::NoRoots);
        }
        let removed: Vec<PathBuf> =
            existing.iter().filter(|r| normalized.iter().any(|n| n == *r)).cloned().collect();
        let survivors: Vec<PathBuf> =
            existing.iter().filter(|r| !normalized.iter().any(|n| n == *r)).cloned().collect();

        if survivors.is_empty() {
            self.wipe_store()?;
            return Ok(RemoveRootsOutcome { state: "done", removed, roots: Vec::new() });
        }

        self.reindex(survivors.clone(), false)?;
        Ok(RemoveRootsOutcome { state: "started", removed, roots: survivors })
    }

    /// Delete every on-disk artifact and database row and reset the
    /// published triple and root set. Shared by [`Self::nuke_all`] and the
    /// empty-survivors case of [`Self::remove_roots`].
    fn wipe_store(&self) -> Result<(), ServiceError> {
        *self.roots.write().unwrap() = Vec::new();
        let mut guard = self.published.write().unwrap();
        if let Some(published) = guard.as_ref() {
            published.meta.lock().unwrap().wipe()?;
        }
        *guard = None;
        for file in [
            self.config.vectors_path(),
            self.config.ids_path(),
            self.config.index_path(),
            self.config.config_path(),
        ] {
            let _ = std::fs::remove_file(file);
        }
        Ok(())
    }

    /// Wipe every artifact and every root. Leaves the service usable — the
    /// next `reindex` starts a brand new corpus from scratch.
    pub fn nuke_all(&self, confirm: Option<&str>) -> Result<(), ServiceError> {
        if let Some(token) = confirm {
            if token != "NUKE" {
                return Err(ServiceError::BadConfirmation);
            }
        }
        {
            let job = self.job.lock().unwrap();
            if let Some(handle) = job.as_ref() {
                if !handle.record.lock().unwrap().is_terminal() {
                    return Err(ServiceError::JobInProgress);
                }
            }
        }
        self.wipe_store()
    }
}

#[cfg(test)]
fn assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockBackend;
    use std::sync::Arc;

    #[test]
    fn index_service_is_send_and_sync() {
        assert_send_sync::<IndexService>();
    }

    fn service_with_images(dir: &Path) -> Arc<IndexService> {
        let root = dir.join("photos");
        std::fs::create_dir_all(&root).unwrap();
        let img = image::RgbImage::from_fn(12, 8, |x, y| image::Rgb([x as u8, y as u8, 7]));
        img.save(root.join("a.jpg")).unwrap();

        let mut config = ServiceConfig::default();
        config.store_dir = dir.join("store");
        config.progress_every = 1;
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(MockBackend::new(16));
        let service = IndexService::new(config, backend).unwrap();
        let job_id = service.reindex(vec![root], true).unwrap();
        loop {
            let status = service.reindex_status().unwrap();
            if status.job_id == job_id && status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        service
    }

    #[test]
    fn not_ready_before_first_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.store_dir = dir.path().join("store");
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(MockBackend::new(8));
        let service = IndexService::new(config, backend).unwrap();
        assert!(!service.is_ready());
        assert_eq!(service.folders().unwrap().total_images, 0);
        assert!(matches!(service.search_text("x", 5, &Filters::default()), Err(ServiceError::NoIndex)));
    }

    #[test]
    fn reindex_then_search_text_finds_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_images(dir.path());
        assert!(service.is_ready());
        let hits = service.search_text("anything", 5, &Filters::default()).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn second_reindex_while_running_returns_the_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("photos");
        std::fs::create_dir_all(&root).unwrap();
        for i in 0..20 {
            let img = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x + i) as u8, y as u8, 0]));
            img.save(root.join(format!("{i}.jpg"))).unwrap();
        }
        let mut config = ServiceConfig::default();
        config.store_dir = dir.path().join("store");
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(MockBackend::new(8));
        let service = IndexService::new(config, backend).unwrap();
        let first = service.reindex(vec![root.clone()], true).unwrap();
        let second = service.reindex(vec![root], true).unwrap();
        // Either the first job had already finished (new job scheduled) or it
        // was still running and its id was handed back unchanged — both are
        // valid outcomes of a fast in-memory MockBackend pass.
        let status = service.reindex_status().unwrap();
        assert!(second == first || status.job_id == second);
    }

    #[test]
    fn nuke_all_clears_published_index() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_images(dir.path());
        service.nuke_all(None).unwrap();
        assert!(!service.is_ready());
        assert!(service.roots().is_empty());
    }

    #[test]
    fn nuke_all_rejects_wrong_confirmation_token() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_images(dir.path());
        let result = service.nuke_all(Some("please"));
        assert!(matches!(result, Err(ServiceError::BadConfirmation)));
        assert!(service.is_ready());
    }

    #[test]
    fn remove_roots_with_survivors_reindexes_only_them() {
        let dir = tempfile::tempdir().unwrap();
        let root_a = dir.path().join("a");
        let root_b = dir.path().join("b");
        std::fs::create_dir_all(&root_a).unwrap();
        std::fs::create_dir_all(&root_b).unwrap();
        let img = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 0]));
        img.save(root_a.join("a.jpg")).unwrap();
        img.save(root_b.join("b.jpg")).unwrap();

        let mut config = ServiceConfig::default();
        config.store_dir = dir.path().join("store");
        config.progress_every = 1;
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(MockBackend::new(8));
        let service = IndexService::new(config, backend).unwrap();
        let job_id = service.reindex(vec![root_a.clone(), root_b.clone()], true).unwrap();
        loop {
            let status = service.reindex_status().unwrap();
            if status.job_id == job_id && status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(service.roots().len(), 2);

        let outcome = service.remove_roots(&[root_b.clone()]).unwrap();
        assert_eq!(outcome.state, "started");
        assert_eq!(outcome.roots, vec![RootSet::normalize(&root_a).unwrap()]);

        loop {
            let status = service.reindex_status().unwrap();
            if status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(service.roots(), vec![RootSet::normalize(&root_a).unwrap()]);
        assert_eq!(service.folders().unwrap().total_images, 1);
    }
}
