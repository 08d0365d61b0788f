use crate::chunking::Chunk;
use crate::database::{IndexEntry, VectorStore};
use crate::embeddings::Embedder;
use crate::error::{IndexError, IndexStage};
use crate::progress::ProgressObserver;
use log::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Totals of a completed indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub chunks: usize,
    pub batches: usize,
}

/// Embeds chunks and writes them to a vector store, one batch at a time.
pub struct Indexer<'a, E, S> {
    embedder: &'a E,
    store: &'a S,
    batch_size: usize,
}

impl<'a, E: Embedder, S: VectorStore> Indexer<'a, E, S> {
    pub fn new(embedder: &'a E, store: &'a S, batch_size: usize) -> Self {
        Indexer {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed and upsert `chunks` in consecutive batches, in order.
    ///
    /// Stops at the first failing batch. Batches before it stay stored.
    pub async fn index<P: ProgressObserver + ?Sized>(
        &self,
        chunks: &[Chunk],
        progress: &P,
    ) -> Result<IndexSummary, IndexError> {
        let mut done = 0;
        let mut batches = 0;

        for batch in chunks.chunks(self.batch_size) {
            let offset = done;
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();

            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|cause| IndexError {
                    offset,
                    stage: IndexStage::Embed,
                    cause,
                })?;

            if vectors.len() != batch.len() {
                return Err(IndexError {
                    offset,
                    stage: IndexStage::Embed,
                    cause: anyhow::anyhow!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                });
            }

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    id: entry_id(chunk),
                    vector,
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                })
                .collect();

            self.store
                .upsert(&entries)
                .await
                .map_err(|cause| IndexError {
                    offset,
                    stage: IndexStage::Upsert,
                    cause,
                })?;

            done += batch.len();
            batches += 1;
            debug!("Stored batch {} ({} chunks so far)", batches, done);
            progress.on_progress(done as u64);
        }

        info!("Indexed {} chunks in {} batches", done, batches);
        Ok(IndexSummary {
            chunks: done,
            batches,
        })
    }
}

/// Deterministic id of a chunk: re-indexing an unchanged chunk overwrites
/// its previous entry.
pub fn entry_id(chunk: &Chunk) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(chunk.metadata.source.as_bytes());
    hasher.update(&[0]);
    for (key, value) in &chunk.metadata.fields {
        hasher.update(key.as_bytes());
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(chunk.content.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
