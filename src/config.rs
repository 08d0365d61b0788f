use crate::chunking::{Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::database::QdrantConfig;
use crate::error::ConfigError;
use crate::gemini::GeminiConfig;
use crate::indexer::DEFAULT_BATCH_SIZE;
use crate::ingest::DEFAULT_LOAD_WORKERS;
use crate::openai::OpenAiConfig;
use crate::pinecone::PineconeConfig;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_TOP_K: usize = 4;

/// Where vectors are stored
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Pinecone(PineconeConfig),
    Qdrant(QdrantConfig),
}

/// Which API turns text into vectors
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingConfig {
    OpenAi(OpenAiConfig),
    Gemini(GeminiConfig),
}

/// Tuning knobs of the indexing and chat pipelines
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub chunker: Chunker,
    pub batch_size: usize,
    pub load_workers: usize,
    pub top_k: usize,
    pub stream: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            chunker: Chunker::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            load_workers: DEFAULT_LOAD_WORKERS,
            top_k: DEFAULT_TOP_K,
            stream: true,
        }
    }
}

/// Application configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub folder_path: Option<PathBuf>,
    /// Name of the Pinecone index or Qdrant collection
    pub index_name: String,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    /// Needed for answering; optional when only indexing
    pub gemini: Option<GeminiConfig>,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load from `.env` (if present) and the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let folder_path = lookup("FOLDER_PATH").map(PathBuf::from);
        let index_name = lookup("PINECONE_INDEX").ok_or(ConfigError::Missing("PINECONE_INDEX"))?;

        let store = match lookup("VECTOR_STORE").as_deref() {
            None | Some("pinecone") => StoreConfig::Pinecone(PineconeConfig::from_lookup(lookup)?),
            Some("qdrant") => StoreConfig::Qdrant(QdrantConfig::from_lookup(lookup)?),
            Some(other) => return Err(invalid("VECTOR_STORE", other, "expected pinecone or qdrant")),
        };

        let gemini = match GeminiConfig::from_lookup(lookup) {
            Ok(config) => Some(config),
            Err(ConfigError::Missing(_)) => None,
            Err(e) => return Err(e),
        };

        let embedding = match lookup("EMBEDDING_PROVIDER").as_deref() {
            None | Some("openai") => EmbeddingConfig::OpenAi(OpenAiConfig::from_lookup(lookup)?),
            Some("gemini") => EmbeddingConfig::Gemini(
                gemini.clone().ok_or(ConfigError::Missing("GEMINI_API_KEY"))?,
            ),
            Some(other) => {
                return Err(invalid("EMBEDDING_PROVIDER", other, "expected openai or gemini"))
            }
        };

        let chunker = Chunker::new(
            parse(&lookup, "CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            parse(&lookup, "CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        )?;
        let pipeline = PipelineConfig {
            chunker,
            batch_size: positive(&lookup, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            load_workers: positive(&lookup, "LOAD_WORKERS", DEFAULT_LOAD_WORKERS)?,
            top_k: positive(&lookup, "TOP_K", DEFAULT_TOP_K)?,
            stream: parse(&lookup, "CHAT_STREAM", true)?,
        };

        Ok(Config {
            folder_path,
            index_name,
            store,
            embedding,
            gemini,
            pipeline,
        })
    }

    /// The crawl root; indexing cannot start without it.
    pub fn require_folder(&self) -> Result<&Path, ConfigError> {
        self.folder_path
            .as_deref()
            .ok_or(ConfigError::Missing("FOLDER_PATH"))
    }

    pub fn require_gemini(&self) -> Result<&GeminiConfig, ConfigError> {
        self.gemini
            .as_ref()
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &value, e.to_string())),
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse(lookup, key, default)?;
    if value == 0 {
        return Err(invalid(key, "0", "must be positive"));
    }
    Ok(value)
}
