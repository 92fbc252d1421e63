//! `MetaStore` — an embedded relational store mapping absolute path to
//! `(root, subpath, top_folder, mtime, width, height, orientation)`
//! (spec.md §4.3).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::MetaStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn from_dims(width: u32, height: u32) -> Self {
        if width == height {
            Orientation::Square
        } else if width > height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Square => "square",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "landscape" => Some(Orientation::Landscape),
            "portrait" => Some(Orientation::Portrait),
            "square" => Some(Orientation::Square),
            _ => None,
        }
    }
}

/// Metadata for one indexed image, as returned by [`MetaStore::get_meta`].
#[derive(Debug, Clone, Serialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub folder: String,
}

/// Per-`(root, top_folder)` count, plus per-root totals, for `/folders`.
#[derive(Debug, Clone, Serialize)]
pub struct RootFolders {
    pub root: String,
    pub count: usize,
    pub folders: Vec<FolderCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderCount {
    pub name: String,
    pub count: usize,
}

/// mtimes within this many seconds of each other are considered unchanged.
const MTIME_EPSILON: f64 = 1e-6;

pub struct MetaStore {
    conn: Connection,
}

impl MetaStore {
    pub fn open(path: &Path, busy_timeout_ms: u32) -> Result<Self, MetaStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests that don't want a file on disk.
    pub fn open_in_memory() -> Result<Self, MetaStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<(), MetaStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                path        TEXT PRIMARY KEY,
                root        TEXT NOT NULL,
                subpath     TEXT NOT NULL,
                top_folder  TEXT NOT NULL,
                folder      TEXT NOT NULL,
                mtime       REAL NOT NULL,
                width       INTEGER NOT NULL,
                height      INTEGER NOT NULL,
                orientation TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_images_root ON images(root);
             CREATE INDEX IF NOT EXISTS idx_images_top_folder ON images(top_folder);
             CREATE INDEX IF NOT EXISTS idx_images_folder ON images(folder);
             CREATE INDEX IF NOT EXISTS idx_images_orientation ON images(orientation);
             CREATE INDEX IF NOT EXISTS idx_images_root_top_folder ON images(root, top_folder);",
        )?;
        Ok(())
    }

    /// Derive `subpath` (relative to `root`, falling back to the basename),
    /// `top_folder` (first subpath component), and `folder` (alias of
    /// `top_folder`).
    fn derive(path: &Path, root: &Path) -> (String, String, String) {
        let subpath = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| {
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
            });
        let top_folder = subpath.split('/').next().filter(|s| !s.is_empty()).unwrap_or("").to_string();
        let top_folder = if subpath.contains('/') { top_folder } else { String::new() };
        (subpath, top_folder.clone(), top_folder)
    }

    /// True iff a row with `path` exists and its stored mtime differs from
    /// `mtime` by less than [`MTIME_EPSILON`] seconds.
    pub fn is_up_to_date(&self, path: &Path, mtime: f64) -> Result<bool, MetaStoreError> {
        let stored: Option<f64> = self
            .conn
            .query_row(
                "SELECT mtime FROM images WHERE path = ?1",
                params![path_key(path)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.is_some_and(|s| (s - mtime).abs() < MTIME_EPSILON))
    }

    /// Replace-by-path upsert; derives `subpath`/`top_folder`/`folder`/`orientation`.
    pub fn upsert(
        &self,
        path: &Path,
        root: &Path,
        width: u32,
        height: u32,
        mtime: f64,
    ) -> Result<(), MetaStoreError> {
        let (subpath, top_folder, folder) = Self::derive(path, root);
        let orientation = Orientation::from_dims(width, height);
        self.conn.execute(
            "INSERT INTO images (path, root, subpath, top_folder, folder, mtime, width, height, orientation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(path) DO UPDATE SET
                root = excluded.root,
                subpath = excluded.subpath,
                top_folder = excluded.top_folder,
                folder = excluded.folder,
                mtime = excluded.mtime,
                width = excluded.width,
                height = excluded.height,
                orientation = excluded.orientation",
            params![
                path_key(path),
                path_key(root),
                subpath,
                top_folder,
                folder,
                mtime,
                width,
                height,
                orientation.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Remove every row whose path is not in `current_paths`. Returns the
    /// number of rows removed.
    pub fn delete_missing(&self, current_paths: &HashSet<PathBuf>) -> Result<usize, MetaStoreError> {
        let mut stmt = self.conn.prepare("SELECT path FROM images")?;
        let stored: Vec<String> =
            stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<Result<_, _>>()?;
        let mut removed = 0;
        for path in stored {
            if !current_paths.iter().any(|p| path_key(p) == path) {
                self.conn.execute("DELETE FROM images WHERE path = ?1", params![path])?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn get_meta(&self, path: &Path) -> Result<ImageMeta, MetaStoreError> {
        self.conn
            .query_row(
                "SELECT width, height, orientation, folder FROM images WHERE path = ?1",
                params![path_key(path)],
                |row| {
                    let width: u32 = row.get(0)?;
                    let height: u32 = row.get(1)?;
                    let orientation: String = row.get(2)?;
                    let folder: String = row.get(3)?;
                    Ok((width, height, orientation, folder))
                },
            )
            .optional()?
            .map(|(width, height, orientation, folder)| ImageMeta {
                width,
                height,
                orientation: Orientation::parse(&orientation).unwrap_or(Orientation::Square),
                folder,
            })
            .ok_or_else(|| MetaStoreError::NotFound(path.to_path_buf()))
    }

    pub fn all_paths(&self) -> Result<HashSet<PathBuf>, MetaStoreError> {
        let mut stmt = self.conn.prepare("SELECT path FROM images")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for r in rows {
            out.insert(PathBuf::from(r?));
        }
        Ok(out)
    }

    /// Per-root image count and per-`(root, top_folder)` breakdown, ordered
    /// by count descending.
    pub fn folders_by_root(&self) -> Result<Vec<RootFolders>, MetaStoreError> {
        let mut roots_stmt = self.conn.prepare(
            "SELECT root, COUNT(*) as c FROM images GROUP BY root ORDER BY c DESC",
        )?;
        let roots: Vec<(String, usize)> = roots_stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<Result<_, _>>()?;

        let mut out = Vec::with_capacity(roots.len());
        for (root, count) in roots {
            let mut folder_stmt = self.conn.prepare(
                "SELECT top_folder, COUNT(*) as c FROM images WHERE root = ?1 GROUP BY top_folder ORDER BY c DESC",
            )?;
            let folders: Vec<FolderCount> = folder_stmt
                .query_map(params![root], |row| {
                    Ok(FolderCount { name: row.get(0)?, count: row.get::<_, i64>(1)? as usize })
                })?
                .collect::<Result<_, _>>()?;
            out.push(RootFolders { root, count, folders });
        }
        Ok(out)
    }

    /// Delete every row. Used by `nuke_all` and `remove_roots`'s wipe-to-empty case.
    pub fn wipe(&self) -> Result<(), MetaStoreError> {
        self.conn.execute("DELETE FROM images", [])?;
        Ok(())
    }

    /// Begin an explicit transaction. Paired with [`MetaStore::commit`] /
    /// [`MetaStore::rollback`] so the Indexer can batch upserts and commit
    /// just before handing control to the (possibly slow) embedding backend.
    pub fn begin(&self) -> Result<(), MetaStoreError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<(), MetaStoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), MetaStoreError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
