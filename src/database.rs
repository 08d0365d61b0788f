use crate::document::Metadata;
use crate::embeddings::Embedding;
use crate::error::ConfigError;
use crate::pinecone::PineconeStore;
use anyhow::{Context, Result};
use log::debug;
use qdrant_client::qdrant::{PointStruct, SearchPointsBuilder, UpsertPointsBuilder};
use qdrant_client::Qdrant;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Payload key holding the chunk text next to its metadata.
pub const TEXT_KEY: &str = "text";

/// One persisted (vector, text, metadata) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Stable id derived from the chunk; re-upserting the same chunk overwrites it
    pub id: String,
    pub vector: Embedding,
    pub content: String,
    pub metadata: Metadata,
}

/// A stored chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// A named vector index that already exists on the server.
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Nearest neighbours of `vector`, best match first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
}

/// Flatten an entry into the JSON object stored next to its vector.
pub(crate) fn entry_payload(entry: &IndexEntry) -> Result<Value> {
    let mut payload = serde_json::to_value(&entry.metadata)?;
    if let Value::Object(map) = &mut payload {
        map.insert(TEXT_KEY.to_string(), json!(entry.content));
    }
    Ok(payload)
}

/// Split a stored payload back into text and metadata.
pub(crate) fn chunk_from_payload(mut payload: Value, score: f32) -> Result<ScoredChunk> {
    let content = match &mut payload {
        Value::Object(map) => map.remove(TEXT_KEY),
        _ => None,
    }
    .and_then(|text| text.as_str().map(str::to_string))
    .context("Stored entry has no text")?;

    let metadata: Metadata =
        serde_json::from_value(payload).context("Stored entry has no source metadata")?;

    Ok(ScoredChunk {
        content,
        metadata,
        score,
    })
}

/// Configuration for Qdrant
#[derive(Debug, Clone, PartialEq)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("QDRANT_URL").ok_or(ConfigError::Missing("QDRANT_URL"))?;
        let api_key = lookup("QDRANT_API_KEY");

        Ok(QdrantConfig { url, api_key })
    }
}

/// A Qdrant collection used as the vector index
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    /// Connect and make sure the collection exists
    pub async fn open(config: QdrantConfig, collection: &str) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build()?;
        let store = QdrantStore {
            client,
            collection: collection.to_string(),
        };

        if !store.collection_exists().await? {
            anyhow::bail!("Qdrant collection {} does not exist", collection);
        }
        Ok(store)
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(&self.collection).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to check collection existence: {}",
                e
            )),
        }
    }
}

impl VectorStore for QdrantStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let points = entries
            .iter()
            .map(|entry| {
                let payload: HashMap<String, qdrant_client::qdrant::Value> =
                    serde_json::from_value(entry_payload(entry)?)?;
                Ok(PointStruct::new(
                    point_uuid(&entry.id),
                    entry.vector.values.clone(),
                    payload,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Upserting {} points into {}", points.len(), self.collection);
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .with_context(|| {
                format!("Failed to upsert points in collection {}", self.collection)
            })?;

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let search_request =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64).with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection))?;

        search_response
            .result
            .into_iter()
            .map(|scored_point| {
                let payload: serde_json::Map<String, Value> = scored_point
                    .payload
                    .into_iter()
                    .map(|(key, value)| (key, qdrant_to_json(value)))
                    .collect();
                chunk_from_payload(Value::Object(payload), scored_point.score)
            })
            .collect()
    }
}

fn qdrant_to_json(value: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match value.kind {
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(object)) => Value::Object(
            object
                .fields
                .into_iter()
                .map(|(key, value)| (key, qdrant_to_json(value)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => Value::Null,
    }
}

/// Qdrant point ids must be integers or UUIDs; format a hex id as a UUID.
fn point_uuid(id: &str) -> String {
    let hex: String = id.chars().chain(std::iter::repeat('0')).take(32).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Vector store picked by configuration.
pub enum StoreBackend {
    Pinecone(PineconeStore),
    Qdrant(QdrantStore),
}

impl VectorStore for StoreBackend {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        match self {
            StoreBackend::Pinecone(store) => store.upsert(entries).await,
            StoreBackend::Qdrant(store) => store.upsert(entries).await,
        }
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        match self {
            StoreBackend::Pinecone(store) => store.query(vector, k).await,
            StoreBackend::Qdrant(store) => store.query(vector, k).await,
        }
    }
}
