//! Thumbnail generation is specified only at its interface (spec.md §6.2):
//! the handler resolves `path` through [`imagefinder_core::IndexService`]
//! and delegates the actual decode+resize to whatever implements this trait.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub trait ThumbnailProvider: Send + Sync {
    fn thumbnail(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads the source image, resizes to fit `max_dim`, caches the JPEG bytes
/// under `thumbs/<sha256(path)>.jpg`.
pub struct ImageThumbnailProvider {
    cache_dir: PathBuf,
    max_dim: u32,
}

impl ImageThumbnailProvider {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir, max_dim: 256 }
    }

    fn cache_path(&self, path: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{:x}.jpg", hasher.finalize()))
    }
}

impl ThumbnailProvider for ImageThumbnailProvider {
    fn thumbnail(&self, path: &Path) -> io::Result<Vec<u8>> {
        let cached = self.cache_path(path);
        if let Ok(bytes) = std::fs::read(&cached) {
            return Ok(bytes);
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        let img = image::open(path).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let resized = img.thumbnail(self.max_dim, self.max_dim);

        let mut bytes = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&cached, &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_caches_a_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        image::RgbImage::from_pixel(400, 300, image::Rgb([200, 10, 10])).save(&src).unwrap();

        let provider = ImageThumbnailProvider::new(dir.path().join("thumbs"));
        let first = provider.thumbnail(&src).unwrap();
        assert!(!first.is_empty());
        let second = provider.thumbnail(&src).unwrap();
        assert_eq!(first, second);
    }
}
