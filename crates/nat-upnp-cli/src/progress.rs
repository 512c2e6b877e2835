//! Spinner shown while waiting on the gateway.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Activity spinner on stderr; hidden when stderr is not a terminal
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    /// Start spinning with a message
    #[must_use]
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Stop and erase the spinner
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

/// Format a lease in human-readable form
///
/// A lease of 0 means the mapping never expires.
#[must_use]
pub fn format_lease(seconds: u32) -> String {
    match seconds {
        0 => "permanent".to_string(),
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
