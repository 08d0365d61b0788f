use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The crawl root could not be listed.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("root folder {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("root folder {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("root folder {} cannot be read: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A single file could not be turned into documents.
#[derive(Debug, Error)]
#[error("failed to load {}: {failure}", .path.display())]
pub struct LoadError {
    pub path: PathBuf,
    #[source]
    pub failure: LoadFailure,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, failure: LoadFailure) -> Self {
        LoadError {
            path: path.into(),
            failure,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("document is empty")]
    Empty,

    #[error("not a Word document: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed Word document: {0}")]
    Docx(String),

    #[error("unreadable PDF: {0}")]
    Pdf(String),

    #[error("loader task aborted: {0}")]
    Aborted(String),
}

/// Which half of a batch round-trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStage {
    Embed,
    Upsert,
}

impl fmt::Display for IndexStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStage::Embed => f.write_str("embedding"),
            IndexStage::Upsert => f.write_str("upsert"),
        }
    }
}

/// A batch failed; batches before `offset` are already stored.
#[derive(Debug, Error)]
#[error("{stage} failed for batch starting at chunk {offset}: {cause:#}")]
pub struct IndexError {
    pub offset: usize,
    pub stage: IndexStage,
    pub cause: anyhow::Error,
}

/// A single chat turn went wrong. The loop reports it and keeps going.
#[derive(Debug, Error)]
pub enum ChatTurnError {
    #[error("answer handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("answer stream failed: {0:#}")]
    Stream(anyhow::Error),

    #[error("answer callback failed: {0:#}")]
    Callback(anyhow::Error),

    #[error("cannot write answer: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
