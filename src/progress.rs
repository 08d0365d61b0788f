use indicatif::{ProgressBar, ProgressStyle};

/// Receives progress counts from the pipeline stages.
///
/// Implementations must not block; the stages call this inline after every
/// unit of work.
pub trait ProgressObserver {
    /// `done` is the cumulative count for the current stage.
    fn on_progress(&self, done: u64);
}

impl ProgressObserver for () {
    fn on_progress(&self, _done: u64) {}
}

impl ProgressObserver for ProgressBar {
    fn on_progress(&self, done: u64) {
        self.set_position(done);
    }
}

/// Spinner for stages with an unknown total, e.g. crawling.
pub fn spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}: {pos}") {
        pb.set_style(style);
    }
    pb.set_message(label.to_string());
    pb
}

/// Bar for stages with a known total.
pub fn bar(label: &str, total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(label.to_string());
    pb
}
