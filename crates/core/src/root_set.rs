//! Root-set management: normalization, dedup/containment reduction, and
//! overlap validation (spec.md §4.1).

use std::path::{Path, PathBuf};

use crate::error::{OverlapKind, RootSetError};

/// Case-fold a path component for comparison: case-insensitive on Windows
/// (the platform's case-preserving-but-insensitive default), case-sensitive
/// everywhere else — "follow the filesystem" per spec.md §9.
fn fold(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    #[cfg(target_os = "windows")]
    {
        s.to_lowercase()
    }
    #[cfg(not(target_os = "windows"))]
    {
        s
    }
}

fn is_descendant(inner: &Path, outer: &Path) -> bool {
    if inner == outer {
        return false;
    }
    let inner_folded = fold(inner);
    let outer_folded = fold(outer);
    let outer_with_sep =
        if outer_folded.ends_with('/') { outer_folded.clone() } else { format!("{outer_folded}/") };
    inner_folded.starts_with(&outer_with_sep)
}

pub struct RootSet;

impl RootSet {
    /// Normalize a single root: expand `~`, resolve symlinks, absolutize,
    /// collapse separators, strip a trailing separator.
    pub fn normalize(path: &Path) -> std::io::Result<PathBuf> {
        let expanded = expand_home(path);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(expanded)
        };
        let canonical = absolute.canonicalize().unwrap_or(absolute);
        let mut s = canonical.to_string_lossy().replace('\\', "/");
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
        Ok(PathBuf::from(s))
    }

    /// Dedup and drop any root that is a descendant of another root in the
    /// set. Sorts by (depth, path) first so the containment check is a
    /// single forward scan.
    pub fn minimal(roots: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut unique: Vec<PathBuf> = Vec::new();
        for r in roots {
            if !unique.iter().any(|u| fold(u) == fold(&r)) {
                unique.push(r);
            }
        }
        unique.sort_by_key(|p| (p.components().count(), p.clone()));

        let mut kept: Vec<PathBuf> = Vec::new();
        'outer: for candidate in unique {
            for existing in &kept {
                if is_descendant(&candidate, existing) {
                    continue 'outer;
                }
            }
            kept.push(candidate);
        }
        kept
    }

    /// Detect the three overlap categories between an existing root set and
    /// an incoming one. A root equal to itself is not an overlap.
    pub fn detect_overlaps(existing: &[PathBuf], incoming: &[PathBuf]) -> Overlaps {
        let mut incoming_inside_existing = Vec::new();
        let mut existing_inside_incoming = Vec::new();
        let mut incoming_self_overlap = Vec::new();

        for inc in incoming {
            for exist in existing {
                if is_descendant(inc, exist) {
                    incoming_inside_existing.push((inc.clone(), exist.clone()));
                }
                if is_descendant(exist, inc) {
                    existing_inside_incoming.push((exist.clone(), inc.clone()));
                }
            }
        }

        for (i, a) in incoming.iter().enumerate() {
            for b in incoming.iter().skip(i + 1) {
                if is_descendant(a, b) {
                    incoming_self_overlap.push((a.clone(), b.clone()));
                } else if is_descendant(b, a) {
                    incoming_self_overlap.push((b.clone(), a.clone()));
                }
            }
        }

        Overlaps { incoming_inside_existing, existing_inside_incoming, incoming_self_overlap }
    }

    /// Validate a reindex request's effective root set against the existing
    /// roots, rejecting it if any overlap category is non-empty.
    pub fn validate(existing: &[PathBuf], incoming: &[PathBuf]) -> Result<(), RootSetError> {
        if incoming.is_empty() {
            return Err(RootSetError::Empty);
        }
        let overlaps = Self::detect_overlaps(existing, incoming);
        if overlaps.is_empty() {
            return Ok(());
        }
        let mut pairs = Vec::new();
        for (a, b) in overlaps.incoming_inside_existing {
            pairs.push((a, b, OverlapKind::IncomingInsideExisting));
        }
        for (a, b) in overlaps.existing_inside_incoming {
            pairs.push((a, b, OverlapKind::ExistingInsideIncoming));
        }
        for (a, b) in overlaps.incoming_self_overlap {
            pairs.push((a, b, OverlapKind::IncomingSelfOverlap));
        }
        Err(RootSetError::Overlap { pairs })
    }
}

#[derive(Debug, Default, Clone)]
pub struct Overlaps {
    /// `(inner, outer)` — an incoming root redundantly nested inside an existing one.
    pub incoming_inside_existing: Vec<(PathBuf, PathBuf)>,
    /// `(inner, outer)` — an existing root that would be swallowed by a broader incoming one.
    pub existing_inside_incoming: Vec<(PathBuf, PathBuf)>,
    /// `(inner, outer)` — redundancy within the incoming set itself.
    pub incoming_self_overlap: Vec<(PathBuf, PathBuf)>,
}

impl Overlaps {
    pub fn is_empty(&self) -> bool {
        self.incoming_inside_existing.is_empty()
            && self.existing_inside_incoming.is_empty()
            && self.incoming_self_overlap.is_empty()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = dirs_home() {
                return home.join(rest.trim_start_matches('/'));
            }
        }
    }
    path.to_path_buf()
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

impl std::fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlapKind::IncomingInsideExisting => write!(f, "redundant (already covered)"),
            OverlapKind::ExistingInsideIncoming => write!(f, "would be swallowed by new root"),
            OverlapKind::IncomingSelfOverlap => write!(f, "overlaps another requested root"),
        }
    }
}

impl std::fmt::Display for RootSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootSetError::Empty => write!(f, "root set is empty"),
            RootSetError::Overlap { pairs } => {
                write!(f, "overlap detected: ")?;
                for (i, (inner, outer, kind)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(
                        f,
                        "{} {} by {}",
                        inner.display(),
                        kind,
                        outer.display()
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_drops_descendants() {
        let roots =
            vec![PathBuf::from("/a"), PathBuf::from("/a/b"), PathBuf::from("/c")];
        let min = RootSet::minimal(roots);
        assert_eq!(min, vec![PathBuf::from("/a"), PathBuf::from("/c")]);
    }

    #[test]
    fn minimal_is_idempotent() {
        let roots = vec![PathBuf::from("/a"), PathBuf::from("/a/b"), PathBuf::from("/c")];
        let once = RootSet::minimal(roots);
        let twice = RootSet::minimal(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn self_equal_is_not_overlap() {
        let existing = vec![PathBuf::from("/a/b")];
        let incoming = vec![PathBuf::from("/a/b")];
        let overlaps = RootSet::detect_overlaps(&existing, &incoming);
        assert!(overlaps.is_empty());
    }

    #[test]
    fn existing_inside_incoming_is_forbidden() {
        let existing = vec![PathBuf::from("/a/b")];
        let incoming = vec![PathBuf::from("/a")];
        let overlaps = RootSet::detect_overlaps(&existing, &incoming);
        assert_eq!(overlaps.existing_inside_incoming, vec![(PathBuf::from("/a/b"), PathBuf::from("/a"))]);
        assert!(RootSet::validate(&existing, &incoming).is_err());
    }

    #[test]
    fn incoming_self_overlap_detected() {
        let existing: Vec<PathBuf> = vec![];
        let incoming = vec![PathBuf::from("/a"), PathBuf::from("/a/b")];
        let overlaps = RootSet::detect_overlaps(&existing, &incoming);
        assert_eq!(overlaps.incoming_self_overlap.len(), 1);
    }

    #[test]
    fn overlap_detection_symmetric_for_equal_inputs() {
        let set = vec![PathBuf::from("/a"), PathBuf::from("/z")];
        let o1 = RootSet::detect_overlaps(&set, &set);
        let o2 = RootSet::detect_overlaps(&set, &set);
        assert!(o1.is_empty());
        assert!(o2.is_empty());
    }
}
