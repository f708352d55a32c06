//! Terminal progress display for model downloads.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} [{elapsed_precise}] {bytes} downloaded";

/// Progress bar fed by the downloader's `(bytes_so_far, total_bytes)` callback.
///
/// Nothing is drawn until the first update, so a cache hit leaves the
/// terminal untouched.
pub struct DownloadProgress {
    label: String,
    quiet: bool,
    bar: Option<ProgressBar>,
    sized: bool,
}

impl DownloadProgress {
    /// Create a progress display; `quiet` draws nothing.
    pub fn new(label: &str, quiet: bool) -> Self {
        Self {
            label: label.to_string(),
            quiet,
            bar: None,
            sized: false,
        }
    }

    fn bar(&mut self) -> &ProgressBar {
        let (label, quiet) = (&self.label, self.quiet);
        self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new_spinner();
            if quiet {
                bar.set_draw_target(ProgressDrawTarget::hidden());
            }
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template(SPINNER_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_message(label.clone());
            bar
        })
    }

    /// Record progress. A non-zero total switches the spinner into a bar.
    pub fn update(&mut self, done: u64, total: u64) {
        let switch = total > 0 && !self.sized;
        let bar = self.bar();
        if switch {
            bar.set_length(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
        }
        bar.set_position(done);
        if switch {
            self.sized = true;
        }
    }

    /// Whether anything has been drawn yet.
    pub fn is_started(&self) -> bool {
        self.bar.is_some()
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }
}
