//! `PathWalker` — enumerates `(root, absolute_path)` for every supported
//! image file beneath a set of roots (spec.md §4.2).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ignore::WalkBuilder;

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct PathWalker;

impl PathWalker {
    /// Walk every root and yield `(root, absolute_path)` for files whose
    /// extension is in the supported set. Image libraries have no
    /// `.gitignore` semantics and the root itself may be hidden (e.g. a
    /// dotfile-prefixed photo dump), so hidden-file and git-ignore
    /// filtering are both disabled — unlike the code-scanning walk this is
    /// adapted from.
    pub fn walk(roots: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
        let results: Arc<Mutex<Vec<(PathBuf, PathBuf)>>> = Arc::new(Mutex::new(Vec::new()));

        for root in roots {
            if !root.exists() {
                continue;
            }
            let root_for_filter = root.clone();
            let results_for_root = Arc::clone(&results);
            WalkBuilder::new(root)
                .hidden(false)
                .git_ignore(false)
                .git_global(false)
                .git_exclude(false)
                .threads(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(12))
                .build_parallel()
                .run(|| {
                    let root = root_for_filter.clone();
                    let results = Arc::clone(&results_for_root);
                    Box::new(move |entry| {
                        let entry = match entry {
                            Ok(e) => e,
                            Err(_) => return ignore::WalkState::Continue,
                        };
                        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                            return ignore::WalkState::Continue;
                        }
                        let abs_path = entry.path().to_path_buf();
                        if !is_supported_extension(&abs_path) {
                            return ignore::WalkState::Continue;
                        }
                        results.lock().unwrap().push((root.clone(), abs_path));
                        ignore::WalkState::Continue
                    })
                });
        }

        Arc::try_unwrap(results).unwrap().into_inner().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_only_supported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();

        let found = PathWalker::walk(&[dir.path().to_path_buf()]);
        let names: Vec<String> =
            found.iter().map(|(_, p)| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert!(names.contains(&"a.jpg".to_string()));
        assert!(names.contains(&"b.PNG".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
    }
}
