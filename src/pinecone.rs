use crate::database::{chunk_from_payload, entry_payload, IndexEntry, ScoredChunk, VectorStore};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CONTROLLER_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

/// Configuration for Pinecone
#[derive(Debug, Clone, PartialEq)]
pub struct PineconeConfig {
    pub api_key: String,
    pub controller_url: String,
}

impl PineconeConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("PINECONE_API_KEY").ok_or(ConfigError::Missing("PINECONE_API_KEY"))?;
        let controller_url = lookup("PINECONE_CONTROLLER_URL")
            .unwrap_or_else(|| DEFAULT_CONTROLLER_URL.to_string());

        Ok(PineconeConfig {
            api_key,
            controller_url,
        })
    }
}

/// A Pinecone index, addressed through its data-plane host
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    host: String,
}

impl PineconeStore {
    /// Resolve the data-plane host of `index_name`; fails if the index is missing
    pub async fn open(config: PineconeConfig, index_name: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct IndexDescription {
            host: String,
        }

        let client = reqwest::Client::new();
        let url = format!(
            "{}/indexes/{}",
            config.controller_url.trim_end_matches('/'),
            index_name
        );

        let response = client
            .get(&url)
            .header("Api-Key", &config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .with_context(|| format!("Failed to describe Pinecone index {}", index_name))?;

        if response.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("Pinecone index {} does not exist", index_name);
        }
        let description: IndexDescription = check(response).await?.json().await?;
        info!("Using Pinecone index {} at {}", index_name, description.host);

        Ok(PineconeStore {
            client,
            api_key: config.api_key,
            host: data_plane_url(&description.host),
        })
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await?;
        check(response).await
    }
}

impl VectorStore for PineconeStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        #[derive(Serialize)]
        struct Vector<'a> {
            id: &'a str,
            values: &'a [f32],
            metadata: Value,
        }

        #[derive(Serialize)]
        struct UpsertRequest<'a> {
            vectors: Vec<Vector<'a>>,
        }

        let vectors = entries
            .iter()
            .map(|entry| {
                Ok(Vector {
                    id: &entry.id,
                    values: &entry.vector.values,
                    metadata: entry_payload(entry)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Upserting {} vectors into {}", vectors.len(), self.host);
        self.post("/vectors/upsert", &UpsertRequest { vectors })
            .await
            .context("Failed to upsert vectors into Pinecone")?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct QueryRequest<'a> {
            vector: &'a [f32],
            top_k: usize,
            include_metadata: bool,
        }

        let request = QueryRequest {
            vector,
            top_k: k,
            include_metadata: true,
        };

        let response: QueryResponse = self
            .post("/query", &request)
            .await
            .context("Failed to query Pinecone")?
            .json()
            .await?;

        response
            .matches
            .into_iter()
            .map(|m| chunk_from_payload(m.metadata.unwrap_or(Value::Null), m.score))
            .collect()
    }
}

#[derive(Deserialize, Debug)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize, Debug)]
struct QueryMatch {
    score: f32,
    metadata: Option<Value>,
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(anyhow::anyhow!(
        "API request failed: {} {}",
        status,
        error_text
    ))
}

/// The control plane returns bare host names.
fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_plane_url() {
        assert_eq!(
            data_plane_url("docs-abc123.svc.aped-4627-b74a.pinecone.io"),
            "https://docs-abc123.svc.aped-4627-b74a.pinecone.io"
        );
        assert_eq!(data_plane_url("http://localhost:5081/"), "http://localhost:5081");
    }

    #[test]
    fn test_query_response_parses_metadata() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"matches":[{"id":"a1","score":0.82,"values":[],
                "metadata":{"source":"docs/notes.txt","text":"hello","chunk_index":2}}],
                "namespace":""}"#,
        )
        .unwrap();

        let chunks: Vec<ScoredChunk> = response
            .matches
            .into_iter()
            .map(|m| chunk_from_payload(m.metadata.unwrap_or(Value::Null), m.score))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[0].metadata.source, "docs/notes.txt");
        assert_eq!(chunks[0].score, 0.82);
    }

    #[test]
    fn test_config_defaults_controller() {
        let config = PineconeConfig::from_lookup(|key| {
            (key == "PINECONE_API_KEY").then(|| "pc-key".to_string())
        })
        .unwrap();
        assert_eq!(config.controller_url, DEFAULT_CONTROLLER_URL);
    }
}
