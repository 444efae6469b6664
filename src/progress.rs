//! Progress UI (spinner) for collection runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// A terminal spinner shown while a source is collected. Hidden when the
/// output is not interactive or `--quiet` is set.
pub(crate) struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub(crate) fn start(enabled: bool, message: String) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub(crate) fn set_message(&self, message: String) {
        self.bar.set_message(message);
    }

    pub(crate) fn finish(self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::Spinner;

    #[test]
    fn test_disabled_spinner_is_hidden() {
        let spinner = Spinner::start(false, "collecting".to_string());
        assert!(spinner.bar.is_hidden());
        spinner.finish();
    }

    #[test]
    fn test_spinner_message_updates() {
        let spinner = Spinner::start(true, "collecting @alice".to_string());
        spinner.set_message("collecting @bob".to_string());
        assert_eq!(spinner.bar.message(), "collecting @bob");
        spinner.finish();
    }
}
