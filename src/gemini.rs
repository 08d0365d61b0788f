use crate::embeddings::{Embedder, Embedding};
use crate::error::ConfigError;
use crate::rag::Generator;
use anyhow::Result;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use log::debug;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const EMBEDDING_MODEL: &str = "models/text-embedding-004";
const ANSWER_MODEL: &str = "models/gemini-2.0-flash";

/// Configuration for Gemini API
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub generate_url: String,
    pub stream_url: String,
}

impl GeminiConfig {
    /// Read `GEMINI_*` settings through `lookup`, defaulting the endpoints.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;
        let embeddings_url = lookup("GEMINI_EMBEDDINGS_URL").unwrap_or_else(|| {
            format!("{}/{}:batchEmbedContents", API_BASE, EMBEDDING_MODEL)
        });
        let generate_url = lookup("GEMINI_GENERATE_URL")
            .unwrap_or_else(|| format!("{}/{}:generateContent", API_BASE, ANSWER_MODEL));
        let stream_url = lookup("GEMINI_STREAM_URL")
            .unwrap_or_else(|| format!("{}/{}:streamGenerateContent", API_BASE, ANSWER_MODEL));

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
            stream_url,
        })
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
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

        Ok(response)
    }

    fn answer_request<'a>(prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: ANSWER_MODEL,
            contents: vec![Content::new_with_role(prompt, "user")],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 1024,
            },
        }
    }
}

impl Embedder for GeminiClient {
    /// Embed all texts with one `batchEmbedContents` call
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        #[derive(Serialize)]
        struct EmbeddingContent<'a> {
            parts: Vec<Part<'a>>,
        }

        #[derive(Serialize)]
        struct EmbedContentRequest<'a> {
            model: &'static str,
            content: EmbeddingContent<'a>,
        }

        #[derive(Serialize)]
        struct BatchEmbedRequest<'a> {
            requests: Vec<EmbedContentRequest<'a>>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: EMBEDDING_MODEL,
                    content: EmbeddingContent {
                        parts: vec![Part { text }],
                    },
                })
                .collect(),
        };

        debug!("Requesting {} Gemini embeddings", texts.len());
        let response = self.post(&self.config.embeddings_url, &request).await?;
        let response_data: BatchEmbeddingResponse = response.json().await?;

        if response_data.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response_data.embeddings.len()
            );
        }

        Ok(response_data
            .embeddings
            .into_iter()
            .map(|e| Embedding { values: e.values })
            .collect())
    }
}

impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = Self::answer_request(prompt);
        let response = self.post(&self.config.generate_url, &request).await?;
        let response_data: GenerateResponse = response.json().await?;

        response_data
            .first_text()
            .ok_or_else(|| anyhow::anyhow!("No response generated"))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = Self::answer_request(prompt);
        let url = format!("{}?alt=sse", self.config.stream_url);
        let response = self.post(&url, &request).await?;

        let bytes = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(anyhow::Error::from)
            .boxed();
        Ok(sse_text(bytes).boxed())
    }
}

/// Decode a server-sent event stream of `GenerateResponse` payloads into
/// the text fragments they carry.
fn sse_text<S>(bytes: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    let lines = stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut finished)| async move {
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim_end().to_string();
                    return Some((Ok(line), (bytes, buffer, finished)));
                }
                if finished {
                    if buffer.is_empty() {
                        return None;
                    }
                    let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                    buffer.clear();
                    return Some((Ok(line), (bytes, buffer, finished)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), (bytes, buffer, true))),
                    None => finished = true,
                }
            }
        },
    );

    lines.try_filter_map(|line| async move { parse_event(&line) })
}

/// Text carried by one `data:` line; other lines carry nothing.
fn parse_event(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let chunk: GenerateResponse = serde_json::from_str(data.trim())?;
    Ok(chunk.first_text().filter(|text| !text.is_empty()))
}

#[derive(Deserialize, Debug)]
struct BatchEmbeddingResponse {
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'static str,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
    }
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":{}}}],\"role\":\"model\"}}}}]}}\r\n\r\n",
            serde_json::to_string(text).unwrap()
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = GeminiConfig::from_lookup(|key| {
            (key == "GEMINI_API_KEY").then(|| "key".to_string())
        })
        .unwrap();
        assert!(config.embeddings_url.ends_with("text-embedding-004:batchEmbedContents"));
        assert!(config.stream_url.ends_with(":streamGenerateContent"));
    }

    #[test]
    fn test_config_requires_key() {
        assert_eq!(
            GeminiConfig::from_lookup(|_| None),
            Err(ConfigError::Missing("GEMINI_API_KEY"))
        );
    }

    #[tokio::test]
    async fn test_sse_fragments_split_across_chunks() {
        let body = format!("{}{}{}", event("Hel"), event("lo, "), event("wörld"));
        let bytes = body.into_bytes();
        // Split inside a multi-byte character and inside event lines
        let chunks: Vec<Result<Vec<u8>>> = bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();

        let fragments: Vec<String> = sse_text(stream::iter(chunks)).try_collect().await.unwrap();
        assert_eq!(fragments, vec!["Hel", "lo, ", "wörld"]);
    }

    #[tokio::test]
    async fn test_sse_last_event_without_newline() {
        let body = event("tail");
        let body = body.trim_end().to_string();
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(body.into_bytes())];

        let fragments: Vec<String> = sse_text(stream::iter(chunks)).try_collect().await.unwrap();
        assert_eq!(fragments, vec!["tail"]);
    }

    #[tokio::test]
    async fn test_sse_transport_error_is_surfaced() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(event("ok").into_bytes()),
            Err(anyhow::anyhow!("connection reset")),
        ];

        let results: Vec<Result<String>> = sse_text(stream::iter(chunks)).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "ok");
        assert!(results[1].is_err());
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(response.first_text(), None);
    }
}
