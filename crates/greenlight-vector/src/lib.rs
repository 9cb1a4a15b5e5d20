//! Greenlight vector crate: embedding models, the embedding cache and engine,
//! cosine similarity ranking, and note-to-policy search.

pub mod cache;
pub mod embedding;
pub mod engine;
pub mod index;
pub mod search;
pub mod similarity;

pub use cache::{cache_key, EmbeddingCache};
pub use embedding::{load_model, EmbeddingModel, MockEmbeddingModel, OnnxEmbeddingModel};
pub use engine::{DegradeReason, EmbedOutcome, EmbeddingEngine, ModelInfo};
pub use index::{PolicyDocument, PolicyIndex, PolicyMatch};
pub use search::{PolicySearch, SearchOptions, SearchResponse};
pub use similarity::{cosine_similarity, rank, RankedHit};
