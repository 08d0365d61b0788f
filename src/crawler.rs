use crate::error::DiscoveryError;
use crate::progress::ProgressObserver;
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions picked up by a crawl, without the leading dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &["docx", "txt", "pdf"];

/// Recursively discovers loadable documents below a root folder.
#[derive(Debug, Clone)]
pub struct PathCrawler {
    extensions: Vec<String>,
}

impl Default for PathCrawler {
    fn default() -> Self {
        Self::with_extensions(ALLOWED_EXTENSIONS)
    }
}

impl PathCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crawl for a custom allow-list. Entries are compared case-sensitively.
    pub fn with_extensions<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_string())
            .collect();
        PathCrawler { extensions }
    }

    /// Whether `path` has an allowed extension (the suffix after the last `.`).
    pub fn accepts(&self, path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => self.extensions.iter().any(|allowed| allowed == ext),
            None => false,
        }
    }

    /// Walk `root` depth-first and return the allowed files.
    ///
    /// Entries are visited in file-name order, so the result is stable for a
    /// given filesystem snapshot. Symbolic links are followed; a link that
    /// loops back to an ancestor is logged and skipped.
    pub fn crawl<P: ProgressObserver + ?Sized>(
        &self,
        root: &Path,
        progress: &P,
    ) -> Result<Vec<PathBuf>, DiscoveryError> {
        check_root(root)?;

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.depth() == 0 {
                        let source = e
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::other("cannot list root folder"));
                        return Err(DiscoveryError::Unreadable {
                            path: root.to_path_buf(),
                            source,
                        });
                    }
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }

            debug!("Found document: {}", entry.path().display());
            found.push(entry.into_path());
            progress.on_progress(found.len() as u64);
        }

        Ok(found)
    }
}

fn check_root(root: &Path) -> Result<(), DiscoveryError> {
    let metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DiscoveryError::Missing(root.to_path_buf()))
        }
        Err(source) => {
            return Err(DiscoveryError::Unreadable {
                path: root.to_path_buf(),
                source,
            })
        }
    };

    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }

    fs::read_dir(root).map_err(|source| DiscoveryError::Unreadable {
        path: root.to_path_buf(),
        source,
    })?;

    Ok(())
}
