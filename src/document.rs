use crate::error::{LoadError, LoadFailure};
use crate::{docx, pdf};
use log::{debug, info, warn};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Metadata attached to documents and chunks.
///
/// Serializes to a flat JSON object: `source` plus loader- or chunker-specific
/// scalar fields. Vector stores persist it as-is next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Path of the file the text came from
    pub source: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn new(source: impl Into<String>) -> Self {
        Metadata {
            source: source.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Text extracted from a file, before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub content: String,
    pub metadata: Metadata,
}

/// Parser selected for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Docx,
    PlainText,
    Pdf,
    Unknown,
}

impl DocumentKind {
    /// Classify by the extension after the last `.`, case-sensitively.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("docx") => DocumentKind::Docx,
            Some("txt") => DocumentKind::PlainText,
            Some("pdf") => DocumentKind::Pdf,
            _ => DocumentKind::Unknown,
        }
    }
}

/// Dispatches a file to the parser for its kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        DocumentLoader
    }

    /// Load one file into one or more documents.
    ///
    /// Files with an unrecognized extension go through the Word parser.
    pub fn load(&self, path: &Path) -> Result<Vec<RawDocument>, LoadError> {
        let kind = DocumentKind::from_path(path);
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Loading {} as {:?} ({})", path.display(), kind, mime_type);

        let base = Metadata::new(path.display().to_string()).with("mime_type", mime_type);

        let documents = match kind {
            DocumentKind::PlainText => read_text(path, base),
            DocumentKind::Pdf => pdf::read_pdf(path, base),
            DocumentKind::Docx => docx::read_docx(path, base),
            DocumentKind::Unknown => {
                warn!(
                    "Unrecognized extension for {}, trying the Word parser",
                    path.display()
                );
                docx::read_docx(path, base)
            }
        }
        .map_err(|failure| LoadError::new(path, failure))?;

        info!("Loaded {} document(s) from {}", documents.len(), path.display());
        Ok(documents)
    }
}

/// Read a plain text file as a single document.
fn read_text(path: &Path, metadata: Metadata) -> Result<Vec<RawDocument>, LoadFailure> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(LoadFailure::Empty);
    }

    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            warn!("{} is not valid UTF-8, decoding lossily", path.display());
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    Ok(vec![RawDocument { content, metadata }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_dispatch_is_case_sensitive() {
        assert_eq!(DocumentKind::from_path(Path::new("a.docx")), DocumentKind::Docx);
        assert_eq!(DocumentKind::from_path(Path::new("a.txt")), DocumentKind::PlainText);
        assert_eq!(DocumentKind::from_path(Path::new("dir.v2/a.pdf")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), DocumentKind::Unknown);
        assert_eq!(DocumentKind::from_path(Path::new("a")), DocumentKind::Unknown);
    }

    #[test]
    fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "Hello\n\nWorld").unwrap();

        let docs = DocumentLoader::new().load(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "Hello\n\nWorld");
        assert_eq!(docs[0].metadata.source, path.display().to_string());
        assert_eq!(
            docs[0].metadata.get("mime_type"),
            Some(&Value::from("text/plain"))
        );
    }

    #[test]
    fn test_load_empty_text_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "").unwrap();

        let err = DocumentLoader::new().load(&path).unwrap_err();
        assert_eq!(err.path, path);
        assert!(matches!(err.failure, LoadFailure::Empty));
    }

    #[test]
    fn test_load_invalid_utf8_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        fs::write(&path, [b'c', b'a', b'f', 0xe9]).unwrap();

        let docs = DocumentLoader::new().load(&path).unwrap();
        assert_eq!(docs[0].content, "caf\u{fffd}");
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.txt");
        fs::write(&path, "unchanged content").unwrap();

        let loader = DocumentLoader::new();
        assert_eq!(loader.load(&path).unwrap(), loader.load(&path).unwrap());
    }

    #[test]
    fn test_unknown_extension_falls_back_to_word_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.rtf");
        fs::write(&path, "plain text, not a zip").unwrap();

        let err = DocumentLoader::new().load(&path).unwrap_err();
        assert!(matches!(err.failure, LoadFailure::Archive(_)));
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let metadata = Metadata::new("a.txt").with("page_number", 2);
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({"source": "a.txt", "page_number": 2}));

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }
}
