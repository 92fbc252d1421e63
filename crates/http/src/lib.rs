//! HTTP API layer for imagefinder (spec.md §6.2).
//!
//! Routes are mounted by [`router`] and share one [`AppContext`]: the
//! [`IndexService`], a [`ThumbnailProvider`], and an [`OsReveal`]. All
//! three are interfaces — the HTTP layer never touches the filesystem or a
//! model directly, it calls through the service.

pub mod error;
pub mod handlers;
pub mod reveal;
pub mod thumbnail;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use imagefinder_core::IndexService;

pub use reveal::{NoopReveal, OsReveal};
pub use thumbnail::{ImageThumbnailProvider, ThumbnailProvider};

#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<IndexService>,
    pub thumbnails: Arc<dyn ThumbnailProvider>,
    pub reveal: Arc<dyn OsReveal>,
    pub start_time: Instant,
}

impl AppContext {
    pub fn new(service: Arc<IndexService>, thumbnails: Arc<dyn ThumbnailProvider>, reveal: Arc<dyn OsReveal>) -> Self {
        Self { service, thumbnails, reveal, start_time: Instant::now() }
    }
}

/// Build the full route table. No static-file fallback: the web UI is an
/// external front-end, out of scope for this server.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/ready", get(handlers::ready))
        .route("/search_text", post(handlers::search_text))
        .route("/search_image", post(handlers::search_image))
        .route("/folders", get(handlers::folders))
        .route("/roots", get(handlers::roots))
        .route("/reindex", post(handlers::reindex))
        .route("/reindex_status", get(handlers::reindex_status))
        .route("/cancel_index", post(handlers::cancel_index))
        .route("/remove_roots", post(handlers::remove_roots))
        .route("/nuke_all", post(handlers::nuke_all))
        .route("/thumb", get(handlers::thumb))
        .route("/open_path", post(handlers::open_path))
        .with_state(ctx)
}
