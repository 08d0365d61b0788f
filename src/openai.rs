use crate::embeddings::{Embedder, Embedding};
use crate::error::ConfigError;
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Configuration for the OpenAI embeddings API
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub model: String,
}

impl OpenAiConfig {
    /// Read `OPENAI_*` settings through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let embeddings_url =
            lookup("OPENAI_EMBEDDINGS_URL").unwrap_or_else(|| DEFAULT_EMBEDDINGS_URL.to_string());
        let model =
            lookup("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(OpenAiConfig {
            api_key,
            embeddings_url,
            model,
        })
    }
}

/// Client for the OpenAI embeddings endpoint
#[derive(Clone)]
pub struct OpenAiEmbeddings {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = reqwest::Client::new();
        OpenAiEmbeddings { config, client }
    }
}

impl Embedder for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        #[derive(Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embeddings from {}", texts.len(), self.config.model);
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.config.embeddings_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: EmbeddingResponse = response.json().await?;
        into_ordered(response_data, texts.len())
    }
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// The API tags each vector with its input position; restore input order.
fn into_ordered(response: EmbeddingResponse, expected: usize) -> Result<Vec<Embedding>> {
    let mut data = response.data;
    if data.len() != expected {
        anyhow::bail!("Expected {} embeddings, got {}", expected, data.len());
    }
    data.sort_by_key(|d| d.index);

    Ok(data
        .into_iter()
        .map(|d| Embedding {
            values: d.embedding,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([("OPENAI_API_KEY", "sk-test")]);
        let config = OpenAiConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.embeddings_url, DEFAULT_EMBEDDINGS_URL);
    }

    #[test]
    fn test_config_requires_key() {
        assert_eq!(
            OpenAiConfig::from_lookup(|_| None),
            Err(ConfigError::Missing("OPENAI_API_KEY"))
        );
    }

    #[test]
    fn test_response_is_reordered() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[
                {"object":"embedding","index":1,"embedding":[0.5,0.5]},
                {"object":"embedding","index":0,"embedding":[1.0,0.0]}
            ],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();

        let vectors = into_ordered(response, 2).unwrap();
        assert_eq!(vectors[0].values, vec![1.0, 0.0]);
        assert_eq!(vectors[1].values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_response_count_mismatch() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#).unwrap();
        assert!(into_ordered(response, 2).is_err());
    }
}
