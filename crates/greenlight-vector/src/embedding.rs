//! Embedding model trait and backends.
//!
//! - `OnnxEmbeddingModel` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with the HuggingFace
//!   tokenizers crate. This is the production backend.
//! - `MockEmbeddingModel` produces deterministic hash-based vectors for tests
//!   and offline runs.
//!
//! Models are synchronous; the engine moves calls onto the worker pool.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use greenlight_core::config::{EmbeddingBackend, EmbeddingConfig};
use greenlight_core::error::{GreenlightError, Result};
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// Token limit applied to ONNX inputs when the tokenizer sets none.
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 256;

/// A loaded text embedding model with a fixed output dimension.
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier; also namespaces the cache.
    fn name(&self) -> &str;

    /// Backend kind, e.g. `"onnx"` or `"mock"`.
    fn backend(&self) -> &'static str;

    fn dimensions(&self) -> usize;

    fn max_sequence_length(&self) -> Option<usize> {
        None
    }

    /// Embed one non-empty text.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several non-empty texts in one call, preserving order.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// Load the backend selected by `config`. Fails if the model is unavailable.
pub fn load_model(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingModel>> {
    let model: Arc<dyn EmbeddingModel> = match config.backend {
        EmbeddingBackend::Onnx => Arc::new(OnnxEmbeddingModel::from_directory(
            &config.model_name,
            &config.resolved_model_dir(),
        )?),
        EmbeddingBackend::Mock => Arc::new(MockEmbeddingModel::new(
            &config.model_name,
            config.mock_dimensions,
        )?),
    };
    info!(
        model = model.name(),
        backend = model.backend(),
        dimensions = model.dimensions(),
        "Embedding model ready"
    );
    Ok(model)
}

fn model_err(context: &str, e: impl std::fmt::Display) -> GreenlightError {
    GreenlightError::Model(format!("{}: {}", context, e))
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingModel - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed sentence-transformer.
///
/// Expects a model directory containing:
/// - `model.onnx`: the sentence-transformer ONNX export
/// - `tokenizer.json`: the HuggingFace fast-tokenizer file
///
/// The model takes `input_ids`, `attention_mask` and `token_type_ids` as i64
/// inputs and produces token-level embeddings. Masked mean pooling and L2
/// normalization give one unit vector per input.
pub struct OnnxEmbeddingModel {
    name: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
    max_sequence_length: usize,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingModel {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn from_directory(name: &str, model_dir: &Path) -> Result<Self> {
        Self::from_files(
            name,
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(name: &str, model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(GreenlightError::Model(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(GreenlightError::Model(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| model_err("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| model_err("ONNX set threads", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_err("ONNX load model", e))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .ok_or_else(|| {
                GreenlightError::Model("ONNX model does not declare a hidden dimension".to_string())
            })?;

        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| model_err("Load tokenizer", e))?;
        let max_sequence_length = tokenizer
            .get_truncation()
            .map(|t| t.max_length)
            .unwrap_or(DEFAULT_MAX_SEQUENCE_LENGTH);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| model_err("Configure truncation", e))?;
        // Batches are padded by hand below.
        tokenizer.with_padding(None);

        info!(
            model = %model_path.display(),
            dimensions,
            max_sequence_length,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            max_sequence_length,
        })
    }

    /// Tokenize, pad to the longest input, run one inference, mean-pool.
    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(GreenlightError::Model("Cannot embed empty text".to_string()));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| model_err("Tokenization failed", e))?;

        let batch = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0);
        if seq_len == 0 {
            return Err(GreenlightError::Model("Tokenizer produced no tokens".to_string()));
        }

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (row, enc) in encodings.iter().enumerate() {
            let base = row * seq_len;
            for (col, &id) in enc.get_ids().iter().enumerate() {
                input_ids[base + col] = id as i64;
            }
            for (col, &m) in enc.get_attention_mask().iter().enumerate() {
                attention_mask[base + col] = m as i64;
            }
            for (col, &t) in enc.get_type_ids().iter().enumerate() {
                token_type_ids[base + col] = t as i64;
            }
        }

        let ids_array = ndarray::Array2::from_shape_vec((batch, seq_len), input_ids)
            .map_err(|e| model_err("input_ids array", e))?;
        let mask_array = ndarray::Array2::from_shape_vec((batch, seq_len), attention_mask.clone())
            .map_err(|e| model_err("attention_mask array", e))?;
        let type_array = ndarray::Array2::from_shape_vec((batch, seq_len), token_type_ids)
            .map_err(|e| model_err("token_type_ids array", e))?;

        let ids_ref =
            TensorRef::from_array_view(&ids_array).map_err(|e| model_err("TensorRef input_ids", e))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| model_err("TensorRef attention_mask", e))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| model_err("TensorRef token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| model_err("Session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| model_err("ONNX inference failed", e))?;

        // ort 2.0 try_extract_tensor returns (&Shape, &[f32]).
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| model_err("Extract embeddings", e))?;

        let shape_dims: Vec<i64> = shape.iter().copied().collect();
        let hidden_dim = match shape_dims.as_slice() {
            [b, s, h] if *b as usize == batch && *s as usize == seq_len => *h as usize,
            other => {
                return Err(GreenlightError::Model(format!(
                    "Unexpected output shape: {:?}",
                    other
                )))
            }
        };

        let vectors = (0..batch)
            .map(|row| {
                let mask = &attention_mask[row * seq_len..(row + 1) * seq_len];
                let tokens = &data[row * seq_len * hidden_dim..(row + 1) * seq_len * hidden_dim];
                mean_pool(tokens, mask, hidden_dim)
            })
            .collect();

        debug!(batch, seq_len, "ONNX batch embedded");
        Ok(vectors)
    }
}

/// Masked mean over the sequence dimension, then L2 normalization.
fn mean_pool(tokens: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (tok_idx, &mask_val) in mask.iter().enumerate() {
        if mask_val > 0 {
            let offset = tok_idx * hidden_dim;
            for (dim, slot) in pooled.iter_mut().enumerate() {
                *slot += tokens[offset + dim];
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }

    l2_normalize(&mut pooled);
    pooled
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values.iter_mut() {
            *val /= norm;
        }
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_sequence_length(&self) -> Option<usize> {
        Some(self.max_sequence_length)
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.run_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| GreenlightError::Model("ONNX returned no embedding".to_string()))
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run_batch(texts)
    }
}

// ---------------------------------------------------------------------------
// MockEmbeddingModel - deterministic hash-based vectors
// ---------------------------------------------------------------------------

/// Deterministic stand-in model.
///
/// Each component is derived from a hash of the input text, so identical
/// inputs always produce identical unit vectors. Counts how many texts it
/// has encoded so tests can observe cache hits.
#[derive(Debug)]
pub struct MockEmbeddingModel {
    name: String,
    dimensions: usize,
    encoded: AtomicUsize,
}

impl MockEmbeddingModel {
    pub fn new(name: &str, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(GreenlightError::Model(
                "Mock model dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            dimensions,
            encoded: AtomicUsize::new(0),
        })
    }

    /// Number of texts encoded so far.
    pub fn encoded_count(&self) -> usize {
        self.encoded.load(Ordering::SeqCst)
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingModel for MockEmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &'static str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(GreenlightError::Model("Cannot embed empty text".to_string()));
        }
        self.encoded.fetch_add(1, Ordering::SeqCst);
        Ok(self.hash_to_vector(text))
    }
}
