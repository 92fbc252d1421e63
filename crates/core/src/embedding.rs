//! Embedding backends (spec.md §6.1). The trait has exactly four operations:
//! decode+preprocess an image file, embed a batch of preprocessed images,
//! embed a batch of text queries, and report the shared embedding dimension.
//! Images and text share one vector space so a text query can rank images.

use std::path::Path;

use crate::error::IndexerError;

/// A decoded, resized, and normalized image ready for the embedding
/// backend's vision tower. `width`/`height` are the *original* file's
/// dimensions (persisted to [`crate::meta_store::MetaStore`]), not the
/// resized tensor's.
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub tensor: Vec<f32>,
}

pub trait EmbeddingBackend: Send + Sync {
    fn dim(&self) -> usize;

    /// Decode `path`, resize/normalize for the vision tower, and record the
    /// original pixel dimensions for metadata.
    fn preprocess(&self, path: &Path) -> Result<PreparedImage, IndexerError>;

    /// Embed a batch of preprocessed images. Output order matches input order.
    fn embed_images(&self, images: &[PreparedImage]) -> Result<Vec<Vec<f32>>, IndexerError>;

    /// Embed a batch of text queries into the same space as `embed_images`.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexerError>;

    /// Compute device name reported by `/ready` (spec.md §6.2). Backends with
    /// no notion of a device (the mock) stay on the default.
    fn device(&self) -> &str {
        "cpu"
    }
}

/// Deterministic, content-hash-seeded backend used by tests and by any
/// build without the `clip` feature enabled. No model download, no GPU.
pub struct MockBackend {
    dim: usize,
}

impl MockBackend {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(32)
    }
}

fn hash_to_unit_vector(seed: &[u8], dim: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let mut out = Vec::with_capacity(dim);
    let mut counter: u32 = 0;
    while out.len() < dim {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks(4) {
            if out.len() >= dim {
                break;
            }
            let mut buf = [0u8; 4];
            buf.copy_from_slice(chunk);
            let v = i32::from_le_bytes(buf) as f32 / i32::MAX as f32;
            out.push(v);
        }
        counter += 1;
    }
    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in out.iter_mut() {
            *v /= norm;
        }
    }
    out
}

impl EmbeddingBackend for MockBackend {
    fn dim(&self) -> usize {
        self.dim
    }

    fn preprocess(&self, path: &Path) -> Result<PreparedImage, IndexerError> {
        let img = image::open(path).map_err(|e| IndexerError::Backend(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        let small = img.resize_exact(8, 8, image::imageops::FilterType::Triangle);
        let tensor: Vec<f32> = small.to_rgb8().into_raw().iter().map(|&b| b as f32 / 255.0).collect();
        Ok(PreparedImage { width, height, tensor })
    }

    fn embed_images(&self, images: &[PreparedImage]) -> Result<Vec<Vec<f32>>, IndexerError> {
        Ok(images
            .iter()
            .map(|img| {
                let bytes: Vec<u8> = img.tensor.iter().flat_map(|v| v.to_le_bytes()).collect();
                hash_to_unit_vector(&bytes, self.dim)
            })
            .collect())
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexerError> {
        Ok(texts.iter().map(|t| hash_to_unit_vector(t.as_bytes(), self.dim)).collect())
    }
}

#[cfg(feature = "clip")]
pub use clip_backend::ClipBackend;

#[cfg(feature = "clip")]
mod clip_backend {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_transformers::models::clip::{ClipConfig, ClipModel};
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    /// CLIP-family backend: a joint image/text space, loaded once at
    /// startup from a Hugging Face repo and held behind a [`Mutex`] because
    /// candle tensors are not `Sync` across concurrent forward passes.
    pub struct ClipBackend {
        inner: Mutex<Inner>,
        dim: usize,
        image_size: usize,
    }

    struct Inner {
        model: ClipModel,
        tokenizer: Tokenizer,
        device: Device,
    }

    impl ClipBackend {
        pub fn load(model_repo: &str) -> Result<Self, IndexerError> {
            let device = Device::Cpu;
            let api = hf_hub::api::sync::Api::new()
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let repo = api.model(model_repo.to_string());
            let weights = repo
                .get("model.safetensors")
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let config_path =
                repo.get("config.json").map_err(|e| IndexerError::Backend(e.to_string()))?;
            let tokenizer_path =
                repo.get("tokenizer.json").map_err(|e| IndexerError::Backend(e.to_string()))?;

            let config_raw = std::fs::read_to_string(&config_path)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let config: ClipConfig = serde_json::from_str(&config_raw)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;

            let vb = unsafe {
                candle_nn::VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)
                    .map_err(|e| IndexerError::Backend(e.to_string()))?
            };
            let model =
                ClipModel::new(vb, &config).map_err(|e| IndexerError::Backend(e.to_string()))?;
            let dim = config.text_config.projection_dim;
            let image_size = config.vision_config.image_size;

            Ok(Self { inner: Mutex::new(Inner { model, tokenizer, device }), dim, image_size })
        }
    }

    impl EmbeddingBackend for ClipBackend {
        fn dim(&self) -> usize {
            self.dim
        }

        fn preprocess(&self, path: &std::path::Path) -> Result<PreparedImage, IndexerError> {
            let img = image::open(path).map_err(|e| IndexerError::Backend(e.to_string()))?;
            let (width, height) = (img.width(), img.height());
            let resized = img.resize_exact(
                self.image_size as u32,
                self.image_size as u32,
                image::imageops::FilterType::Triangle,
            );
            let rgb = resized.to_rgb8();
            let mean = [0.481_454_66f32, 0.457_827_5, 0.408_210_73];
            let std = [0.268_629_54f32, 0.261_302_6, 0.275_777_1];
            let mut tensor = vec![0f32; 3 * self.image_size * self.image_size];
            let plane = self.image_size * self.image_size;
            for (i, px) in rgb.pixels().enumerate() {
                for c in 0..3 {
                    tensor[c * plane + i] = (px[c] as f32 / 255.0 - mean[c]) / std[c];
                }
            }
            Ok(PreparedImage { width, height, tensor })
        }

        fn embed_images(&self, images: &[PreparedImage]) -> Result<Vec<Vec<f32>>, IndexerError> {
            if images.is_empty() {
                return Ok(Vec::new());
            }
            let inner = self.inner.lock().unwrap();
            let flat: Vec<f32> = images.iter().flat_map(|p| p.tensor.iter().copied()).collect();
            let pixel_values = Tensor::from_vec(
                flat,
                (images.len(), 3, self.image_size, self.image_size),
                &inner.device,
            )
            .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let features = inner
                .model
                .get_image_features(&pixel_values)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            tensor_rows_to_vecs(&features)
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexerError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let inner = self.inner.lock().unwrap();
            let encodings = inner
                .tokenizer
                .encode_batch(texts.iter().map(|s| s.as_str()).collect::<Vec<_>>(), true)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
            let mut ids = Vec::with_capacity(texts.len() * max_len);
            for enc in &encodings {
                let mut row: Vec<u32> = enc.get_ids().to_vec();
                row.resize(max_len, 0);
                ids.extend(row);
            }
            let input_ids = Tensor::from_vec(ids, (texts.len(), max_len), &inner.device)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            let features = inner
                .model
                .get_text_features(&input_ids)
                .map_err(|e| IndexerError::Backend(e.to_string()))?;
            tensor_rows_to_vecs(&features)
        }

        fn device(&self) -> &str {
            match self.inner.lock().unwrap().device {
                Device::Cpu => "cpu",
                Device::Cuda(_) => "cuda",
                Device::Metal(_) => "metal",
            }
        }
    }

    fn tensor_rows_to_vecs(t: &Tensor) -> Result<Vec<Vec<f32>>, IndexerError> {
        t.to_vec2::<f32>().map_err(|e| IndexerError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_backend_is_deterministic() {
        let backend = MockBackend::new(16);
        let a = backend.embed_texts(&["cat on a beach".to_string()]).unwrap();
        let b = backend.embed_texts(&["cat on a beach".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mock_backend_distinguishes_inputs() {
        let backend = MockBackend::new(16);
        let a = backend.embed_texts(&["cat".to_string()]).unwrap();
        let b = backend.embed_texts(&["dog".to_string()]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mock_backend_vectors_are_unit_length() {
        let backend = MockBackend::new(16);
        let v = backend.embed_texts(&["anything".to_string()]).unwrap();
        let norm: f32 = v[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
