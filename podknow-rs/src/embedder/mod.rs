//! Embedder client abstraction.
//!
//! # Implementations
//! - [`crate::llm_client::openai::OpenAiClient`] also implements [`EmbedderClient`].

use crate::errors::Result;

/// A vector embedding (f32 components).
pub type Embedding = Vec<f32>;

/// Trait for text-to-vector embedding clients.
#[allow(async_fn_in_trait)]
pub trait EmbedderClient: Send + Sync {
    /// Generate an embedding for a single text string.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for a batch of texts, one per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Dimensionality of the vectors this client produces.
    fn dim(&self) -> usize;
}
