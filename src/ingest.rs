use crate::document::{DocumentLoader, RawDocument};
use crate::error::{LoadError, LoadFailure};
use crate::progress::ProgressObserver;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::fmt::Write as _;
use std::path::PathBuf;

pub const DEFAULT_LOAD_WORKERS: usize = 4;

/// Outcome of loading a set of paths.
#[derive(Debug, Default)]
pub struct IngestionReport {
    /// Documents in crawl order
    pub documents: Vec<RawDocument>,
    /// One error per path that produced no documents
    pub failed: Vec<LoadError>,
}

impl IngestionReport {
    /// One line per failed path, or `None` when everything loaded.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }

        let mut summary = format!("{} file(s) could not be loaded:", self.failed.len());
        for failed in &self.failed {
            let _ = write!(
                summary,
                "\n  {}: {}",
                failed.path.display(),
                failed.failure
            );
        }
        Some(summary)
    }
}

/// Loads files on the blocking pool, a few at a time, keeping input order.
#[derive(Debug, Clone, Copy)]
pub struct IngestionRunner {
    loader: DocumentLoader,
    workers: usize,
}

impl Default for IngestionRunner {
    fn default() -> Self {
        IngestionRunner::new(DEFAULT_LOAD_WORKERS)
    }
}

impl IngestionRunner {
    pub fn new(workers: usize) -> Self {
        IngestionRunner {
            loader: DocumentLoader::new(),
            workers: workers.max(1),
        }
    }

    /// Load every path. A file that fails is recorded and skipped.
    pub async fn run<P: ProgressObserver + ?Sized>(
        &self,
        paths: Vec<PathBuf>,
        progress: &P,
    ) -> IngestionReport {
        let loader = self.loader;
        let mut loads = stream::iter(paths)
            .map(|path| async move {
                let task_path = path.clone();
                tokio::task::spawn_blocking(move || loader.load(&task_path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(LoadError::new(path, LoadFailure::Aborted(e.to_string())))
                    })
            })
            .buffered(self.workers);

        let mut report = IngestionReport::default();
        let mut done = 0;
        while let Some(result) = loads.next().await {
            match result {
                Ok(documents) => report.documents.extend(documents),
                Err(error) => {
                    warn!("{}", error);
                    report.failed.push(error);
                }
            }
            done += 1;
            progress.on_progress(done);
        }

        info!(
            "Loaded {} documents from {} files ({} failed)",
            report.documents.len(),
            done,
            report.failed.len()
        );
        if let Some(summary) = report.failure_summary() {
            warn!("{}", summary);
        }
        report
    }
}
