use crate::database::{ScoredChunk, VectorStore};
use crate::embeddings::Embedder;
use anyhow::{Context, Result};
use log::debug;

/// Finds the stored chunks closest to a question.
///
/// Borrows the same embedder the index was built with.
pub struct Retriever<'a, E, S> {
    embedder: &'a E,
    store: &'a S,
}

impl<'a, E: Embedder, S: VectorStore> Retriever<'a, E, S> {
    pub fn new(embedder: &'a E, store: &'a S) -> Self {
        Retriever { embedder, store }
    }

    /// Up to `k` chunks, best match first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed question")?;

        let chunks = self
            .store
            .query(&vector.values, k)
            .await
            .context("Failed to search the index")?;

        debug!("Retrieved {} chunks for {:?}", chunks.len(), query);
        Ok(chunks)
    }
}
