//! imagefinder-core — crawl, change-detection, embedding pipeline, durable
//! store, and query index for a local-first semantic image search engine.
//!
//! [`IndexService`] is the process-wide façade: it owns the published
//! `(index, ids, meta_conn)` triple, schedules at most one [`Indexer`] job
//! at a time, and answers similarity queries over the corpus. Everything
//! else in this crate is a collaborator `IndexService` drives.

pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod job;
pub mod meta_store;
pub mod numpy_index;
pub mod root_set;
pub mod service;
pub mod vector_store;
pub mod walker;

pub use config::{Config, ServiceConfig};
pub use embedding::EmbeddingBackend;
pub use error::{
    CoreError, IndexerError, MetaStoreError, OverlapKind, Result, RootSetError, ServiceError,
    VectorStoreError,
};
pub use indexer::Indexer;
pub use job::{JobPhase, JobRecord, JobState};
pub use meta_store::{ImageMeta, MetaStore, Orientation};
pub use numpy_index::NumpyIndex;
pub use root_set::RootSet;
pub use service::{FolderBreakdown, Filters, IndexService, RootFolders, SearchHit};
pub use vector_store::VectorStore;
pub use walker::PathWalker;
