//! End-to-end scenarios driving a real `IndexService` over a tempdir root
//! populated with `image`-crate-generated fixtures and `MockBackend`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use imagefinder_core::embedding::{EmbeddingBackend, MockBackend, PreparedImage};
use imagefinder_core::{
    Filters, IndexService, JobPhase, JobRecord, JobState, MetaStore, Orientation, ServiceConfig,
    ServiceError, VectorStore,
};

/// Wraps `MockBackend` to count `embed_images` calls so carry-forward tests
/// can assert nothing was re-embedded.
struct CountingBackend {
    inner: MockBackend,
    embed_calls: AtomicUsize,
}

impl CountingBackend {
    fn new(dim: usize) -> Self {
        Self { inner: MockBackend::new(dim), embed_calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingBackend for CountingBackend {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn preprocess(&self, path: &Path) -> Result<PreparedImage, imagefinder_core::IndexerError> {
        self.inner.preprocess(path)
    }

    fn embed_images(
        &self,
        images: &[PreparedImage],
    ) -> Result<Vec<Vec<f32>>, imagefinder_core::IndexerError> {
        self.embed_calls.fetch_add(images.len(), Ordering::SeqCst);
        self.inner.embed_images(images)
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, imagefinder_core::IndexerError> {
        self.inner.embed_texts(texts)
    }
}

fn write_image(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save(path).unwrap();
}

fn wait_terminal(service: &Arc<IndexService>, timeout: Duration) -> JobRecord {
    let deadline = Instant::now() + timeout;
    loop {
        let record = service.reindex_status().unwrap();
        if record.is_terminal() {
            return record;
        }
        if Instant::now() > deadline {
            return record;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn new_service(store_dir: PathBuf, dim: usize) -> (Arc<IndexService>, Arc<CountingBackend>) {
    let mut config = ServiceConfig::default();
    config.store_dir = store_dir;
    let backend = Arc::new(CountingBackend::new(dim));
    let service = IndexService::new(config, backend.clone() as Arc<dyn EmbeddingBackend>).unwrap();
    (service, backend)
}

#[test]
fn scenario_a_cold_build() {
    let dir = tempfile::tempdir().unwrap();
    let img_dir = dir.path().join("img");
    std::fs::create_dir_all(&img_dir).unwrap();
    write_image(&img_dir.join("a.jpg"), 100, 100);
    write_image(&img_dir.join("b.png"), 200, 100);
    write_image(&img_dir.join("c.jpg"), 100, 200);

    let (service, _backend) = new_service(dir.path().join("store"), 16);
    service.reindex(vec![img_dir.clone()], true).unwrap();
    let record = wait_terminal(&service, Duration::from_secs(10));
    assert_eq!(record.state, JobState::Done);

    let breakdown = service.folders().unwrap();
    assert_eq!(breakdown.total_images, 3);

    let matrix = VectorStore::load(&dir.path().join("store")).unwrap();
    assert_eq!(matrix.rows.len(), 3);
    assert!(matrix.rows.iter().all(|row| row.len() == matrix.dim));

    let meta = MetaStore::open(&dir.path().join("store").join("meta.sqlite"), 5_000).unwrap();
    let mut orientations: Vec<Orientation> = meta
        .all_paths()
        .unwrap()
        .into_iter()
        .map(|path| meta.get_meta(&path).unwrap().orientation)
        .collect();
    orientations.sort_by_key(|o| o.as_str());
    assert_eq!(
        orientations,
        vec![Orientation::Landscape, Orientation::Portrait, Orientation::Square]
    );

    let hits = service.search_text("trivial prompt", 10, &Filters::default()).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn scenario_b_carry_forward() {
    let dir = tempfile::tempdir().unwrap();
    let img_dir = dir.path().join("img");
    std::fs::create_dir_all(&img_dir).unwrap();
    write_image(&img_dir.join("a.jpg"), 100, 100);
    write_image(&img_dir.join("b.png"), 200, 100);
    write_image(&img_dir.join("c.jpg"), 100, 200);

    let (service, backend) = new_service(dir.path().join("store"), 16);
    service.reindex(vec![img_dir.clone()], true).unwrap();
    wait_terminal(&service, Duration::from_secs(10));
    let ids_before = VectorStore::load_ids(&dir.path().join("store")).unwrap();
    let calls_before = backend.calls();
    assert_eq!(calls_before, 3);

    service.reindex(vec![img_dir.clone()], true).unwrap();
    let record = wait_terminal(&service, Duration::from_secs(10));
    assert_eq!(record.state, JobState::Done);
    assert_eq!(record.scanned, 3);

    assert_eq!(backend.calls(), calls_before, "no file should have been re-embedded");

    let mut ids_after = VectorStore::load_ids(&dir.path().join("store")).unwrap();
    let mut ids_before_sorted = ids_before.clone();
    ids_before_sorted.sort();
    ids_after.sort();
    assert_eq!(ids_before_sorted, ids_after);
}

#[test]
fn scenario_c_file_removed() {
    let dir = tempfile::tempdir().unwrap();
    let img_dir = dir.path().join("img");
    std::fs::create_dir_all(&img_dir).unwrap();
    write_image(&img_dir.join("a.jpg"), 100, 100);
    write_image(&img_dir.join("b.png"), 200, 100);
    write_image(&img_dir.join("c.jpg"), 100, 200);

    let (service, _backend) = new_service(dir.path().join("store"), 16);
    service.reindex(vec![img_dir.clone()], true).unwrap();
    wait_terminal(&service, Duration::from_secs(10));

    std::fs::remove_file(img_dir.join("b.png")).unwrap();
    service.reindex(vec![img_dir.clone()], true).unwrap();
    let record = wait_terminal(&service, Duration::from_secs(10));
    assert_eq!(record.state, JobState::Done);

    let ids = VectorStore::load_ids(&dir.path().join("store")).unwrap();
    assert_eq!(ids.len(), 2);

    let meta = MetaStore::open(&dir.path().join("store").join("meta.sqlite"), 5_000).unwrap();
    assert!(meta.get_meta(&img_dir.join("b.png")).is_err());

    let breakdown = service.folders().unwrap();
    assert_eq!(breakdown.total_images, 2);
}

#[test]
fn scenario_d_overlap_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = a.join("b");
    std::fs::create_dir_all(&b).unwrap();
    write_image(&b.join("x.jpg"), 10, 10);

    let (service, _backend) = new_service(dir.path().join("store"), 8);
    service.reindex(vec![b.clone()], true).unwrap();
    wait_terminal(&service, Duration::from_secs(10));

    let result = service.reindex(vec![a.clone()], true);
    assert!(result.is_err());
    match result.unwrap_err() {
        ServiceError::RootSet(e) => {
            let message = e.to_string();
            assert!(message.contains("would be swallowed"));
        }
        other => panic!("expected a RootSet overlap error, got {other:?}"),
    }

    // No second job was scheduled: the published corpus still reflects {b}.
    assert_eq!(service.roots(), vec![imagefinder_core::RootSet::normalize(&b).unwrap()]);
}

#[test]
fn scenario_e_cancel_during_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let img_dir = dir.path().join("img");
    std::fs::create_dir_all(&img_dir).unwrap();
    for i in 0..300 {
        write_image(&img_dir.join(format!("{i}.jpg")), 8, 8);
    }

    let (service, _backend) = new_service(dir.path().join("store"), 8);
    let job_id = service.reindex(vec![img_dir.clone()], true).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let record = service.reindex_status().unwrap();
        let embedding_far_enough =
            record.phase() == Some(JobPhase::Embedding) && record.embedded >= 100;
        if embedding_far_enough || record.is_terminal() {
            break;
        }
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let _ = service.cancel_index(job_id);
    let record = wait_terminal(&service, Duration::from_secs(10));
    assert!(matches!(record.state, JobState::Cancelled) || matches!(record.state, JobState::Done));
    // Either outcome leaves a well-formed service behind; `/ready` never
    // observes a half-published generation.
    assert!(!service.is_ready() || service.folders().is_ok());
}

#[test]
fn scenario_f_wipe_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let img_dir = dir.path().join("img");
    std::fs::create_dir_all(&img_dir).unwrap();
    write_image(&img_dir.join("a.jpg"), 100, 100);
    write_image(&img_dir.join("b.png"), 200, 100);
    write_image(&img_dir.join("c.jpg"), 100, 200);

    let (service, _backend) = new_service(dir.path().join("store"), 16);
    service.reindex(vec![img_dir.clone()], true).unwrap();
    wait_terminal(&service, Duration::from_secs(10));

    service.remove_roots(&[img_dir]).unwrap();

    assert!(!service.is_ready());
    assert!(service.roots().is_empty());
    let breakdown = service.folders().unwrap();
    assert_eq!(breakdown.total_images, 0);
    assert!(breakdown.roots.is_empty());

    let result = service.search_text("anything", 5, &Filters::default());
    assert!(matches!(result, Err(ServiceError::NoIndex)));
}
