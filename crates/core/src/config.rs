//! Runtime configuration and the persisted config record (spec.md §3, §6.3).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the service, loaded from `imagefinder.toml` if
/// present, falling back to these defaults field-by-field.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Directory holding `meta.sqlite`, `vectors.bin`, `ids.json`, `index.bin`,
    /// `config.json`, `thumbs/`, `logs/`.
    pub store_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Number of images embedded per backend call during indexing.
    pub batch_size: usize,
    /// Embedding model name, passed through to the embedding backend.
    pub model_name: String,
    /// SQLite busy-timeout, milliseconds.
    pub busy_timeout_ms: u32,
    /// MetaStore commits every this many upserts during a job.
    pub commit_every: usize,
    /// Progress is reported every this many processed files.
    pub progress_every: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./imagefinder-data"),
            bind_addr: "127.0.0.1:8732".to_string(),
            batch_size: 32,
            model_name: "clip-vit-base-patch32".to_string(),
            busy_timeout_ms: 5_000,
            commit_every: 200,
            progress_every: 50,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawServiceConfig {
    store_dir: Option<PathBuf>,
    bind_addr: Option<String>,
    batch_size: Option<usize>,
    model_name: Option<String>,
    busy_timeout_ms: Option<u32>,
    commit_every: Option<usize>,
    progress_every: Option<usize>,
}

impl ServiceConfig {
    /// Load from a TOML file, applying defaults for any field the file omits.
    /// Returns defaults unchanged if `path` does not exist.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let defaults = Self::default();
        if !path.exists() {
            return Ok(defaults);
        }
        let raw = std::fs::read_to_string(path)?;
        let parsed: RawServiceConfig = toml::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            store_dir: parsed.store_dir.unwrap_or(defaults.store_dir),
            bind_addr: parsed.bind_addr.unwrap_or(defaults.bind_addr),
            batch_size: parsed.batch_size.unwrap_or(defaults.batch_size),
            model_name: parsed.model_name.unwrap_or(defaults.model_name),
            busy_timeout_ms: parsed.busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
            commit_every: parsed.commit_every.unwrap_or(defaults.commit_every),
            progress_every: parsed.progress_every.unwrap_or(defaults.progress_every),
        })
    }

    pub fn meta_db_path(&self) -> PathBuf {
        self.store_dir.join("meta.sqlite")
    }
    pub fn vectors_path(&self) -> PathBuf {
        self.store_dir.join("vectors.bin")
    }
    pub fn ids_path(&self) -> PathBuf {
        self.store_dir.join("ids.json")
    }
    pub fn index_path(&self) -> PathBuf {
        self.store_dir.join("index.bin")
    }
    pub fn config_path(&self) -> PathBuf {
        self.store_dir.join("config.json")
    }
    pub fn thumbs_dir(&self) -> PathBuf {
        self.store_dir.join("thumbs")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.store_dir.join("logs")
    }
}

/// The persisted config record (spec.md §3): `{ model_name, dim, created_at, roots[] }`.
/// Written last during finalization so its presence implies the other three
/// artifacts are coherent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub model_name: String,
    pub dim: usize,
    pub created_at: DateTime<Utc>,
    pub roots: Vec<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Atomic write: write to `<path>.tmp`, then rename over `path`.
    pub fn write_atomic(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
