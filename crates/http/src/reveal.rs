//! Revealing a file in the OS file manager is specified only at its
//! interface (spec.md §6.2): actual Finder/Explorer/`xdg-open` integration
//! is platform glue outside the core this crate wraps.

use std::io;
use std::path::Path;

use tracing::info;

pub trait OsReveal: Send + Sync {
    fn reveal(&self, path: &Path) -> io::Result<()>;
}

/// Default: logs the request and returns `Ok(())`. No window manager is
/// launched.
pub struct NoopReveal;

impl OsReveal for NoopReveal {
    fn reveal(&self, path: &Path) -> io::Result<()> {
        info!(path = %path.display(), "reveal requested, no OS integration configured");
        Ok(())
    }
}
