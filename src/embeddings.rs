use crate::gemini::GeminiClient;
use crate::openai::OpenAiEmbeddings;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Turns texts into vectors, one per input, in input order.
///
/// Index time and query time must use the same model, or similarity scores
/// are meaningless.
#[allow(async_fn_in_trait)]
pub trait Embedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single query string
    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding provider returned no vector"))
    }
}

/// Embedding provider picked by configuration.
pub enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
    Gemini(GeminiClient),
}

impl Embedder for EmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        match self {
            EmbeddingBackend::OpenAi(client) => client.embed(texts).await,
            EmbeddingBackend::Gemini(client) => client.embed(texts).await,
        }
    }
}
