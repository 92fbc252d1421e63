//! imagefinder binary — thin CLI shell over [`imagefinder_core`] and
//! [`imagefinder_http`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use imagefinder_core::embedding::{EmbeddingBackend, MockBackend};
use imagefinder_core::{IndexService, ServiceConfig};
use imagefinder_http::{AppContext, ImageThumbnailProvider, NoopReveal};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Local-first semantic image search engine.
#[derive(Parser)]
#[command(name = "imagefinder", version, about, long_about = None)]
struct Cli {
    /// Path to imagefinder.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding meta.sqlite, vectors.bin, ids.json, index.bin, config.json, thumbs/, logs/
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Address the HTTP server binds to, e.g. 127.0.0.1:8732
    #[arg(long)]
    bind: Option<String>,

    /// Root directory to index at startup (repeatable). Skipped if none given —
    /// use `/reindex` once the server is up.
    #[arg(long = "root", value_name = "PATH")]
    roots: Vec<PathBuf>,

    /// Embedding model name, passed through to the embedding backend
    #[arg(long)]
    model: Option<String>,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

fn build_backend(model_name: &str) -> Arc<dyn EmbeddingBackend> {
    #[cfg(feature = "clip")]
    {
        match imagefinder_core::embedding::ClipBackend::load(model_name) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => warn!(error = %e, model = model_name, "failed to load CLIP backend, falling back to mock embeddings"),
        }
    }
    #[cfg(not(feature = "clip"))]
    {
        warn!("built without the clip feature, using mock embeddings");
    }
    Arc::new(MockBackend::new(32))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("imagefinder=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = cli
        .config
        .as_deref()
        .map(ServiceConfig::load)
        .transpose()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to parse config file, using defaults");
            None
        })
        .unwrap_or_default();

    if let Some(store_dir) = cli.store_dir {
        config.store_dir = store_dir;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(model) = cli.model {
        config.model_name = model;
    }

    info!(store_dir = %config.store_dir.display(), bind = %config.bind_addr, "starting imagefinder");

    let backend = build_backend(&config.model_name);
    let bind_addr = config.bind_addr.clone();
    let thumbs_dir = config.thumbs_dir();
    let service = IndexService::new(config, backend).unwrap_or_else(|e| {
        eprintln!("failed to start: {e}");
        std::process::exit(1);
    });

    if !cli.roots.is_empty() {
        match service.reindex(cli.roots, true) {
            Ok(job_id) => info!(%job_id, "startup indexing scheduled"),
            Err(e) => warn!(error = %e, "could not schedule startup indexing"),
        }
    }

    let thumbnails = Arc::new(ImageThumbnailProvider::new(thumbs_dir));
    let reveal = Arc::new(NoopReveal);
    let ctx = AppContext::new(service, thumbnails, reveal);
    let app = imagefinder_http::router(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap_or_else(|e| {
        eprintln!("failed to bind {bind_addr}: {e}");
        std::process::exit(1);
    });
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
