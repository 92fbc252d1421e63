//! Typed errors for every component in this crate.
//!
//! Each component gets its own error enum so call sites can match on the
//! specific failure instead of string-sniffing; [`CoreError`] is the
//! umbrella type returned from [`crate::service::IndexService`] operations.

use std::path::PathBuf;
use thiserror::Error;

/// A root overlaps another root in a way that reindex requests must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapKind {
    /// An incoming root is a descendant of an existing root (redundant addition).
    IncomingInsideExisting,
    /// An existing root is a descendant of an incoming root (would be swallowed).
    ExistingInsideIncoming,
    /// Two incoming roots overlap each other.
    IncomingSelfOverlap,
}

#[derive(Debug)]
pub enum RootSetError {
    Empty,
    Overlap { pairs: Vec<(PathBuf, PathBuf, OverlapKind)> },
}

impl std::error::Error for RootSetError {}

#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no metadata for path {0}")]
    NotFound(PathBuf),
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store is absent or incomplete")]
    Absent,
    #[error("dimension mismatch: store has {stored}, backend expects {expected}")]
    DimMismatch { stored: usize, expected: usize },
    #[error("corrupt vectors file: expected {expected} bytes, found {found}")]
    Corrupt { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("cancelled")]
    Cancelled,
    #[error("no embeddings produced")]
    NoEmbeddingsProduced,
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    RootSet(#[from] RootSetError),
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error("no index is published yet")]
    NoIndex,
    #[error("a job is running; cannot nuke the store while it is in progress")]
    JobInProgress,
    #[error("no job is running")]
    JobNotRunning,
    #[error("job is not cancellable in its current phase")]
    NotCancellable,
    #[error("job_id mismatch")]
    JobIdMismatch,
    #[error("path is not indexed: {0}")]
    PathNotIndexed(PathBuf),
    #[error("path is not under any configured root: {0}")]
    PathNotUnderRoot(PathBuf),
    #[error("no roots are currently configured")]
    NoRoots,
    #[error("confirmation token must be \"NUKE\"")]
    BadConfirmation,
    #[error("{0}")]
    BadRequest(String),
    #[error("embedding backend error: {0}")]
    Embedding(#[from] IndexerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error type, the union of everything [`crate::service::IndexService`] can fail with.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    RootSet(#[from] RootSetError),
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Indexer(#[from] IndexerError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
