use git2::{Progress, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner style used while a git transfer is running.
/// - Yellow spinner with animated braille-style frames.
/// - Displays the current message (`{wide_msg}`) next to the spinner.
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[33m{spinner}\x1b[0m {wide_msg}")
        .unwrap()
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"])
}

/// Style used when a transfer finishes successfully.
pub fn ok_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[32m✔\x1b[0m {wide_msg}").unwrap()
}

/// Style used when a transfer fails.
pub fn err_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[31m✘\x1b[0m {wide_msg}").unwrap()
}

/// Progress reporting for clone and push in `--debug` mode.
///
/// A disabled reporter holds a hidden bar, so callers never branch on it.
pub struct Transfer {
    pb: ProgressBar,
    label: String,
}

impl Transfer {
    pub fn new(enabled: bool, label: impl Into<String>) -> Self {
        let label = label.into();
        let pb = if enabled {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style());
            pb.set_message(label.clone());
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        Transfer { pb, label }
    }

    /// Hook fetch (clone) progress into `cb`.
    pub fn attach_fetch(&self, cb: &mut RemoteCallbacks<'_>) {
        let pb = self.pb.clone();
        let label = self.label.clone();
        cb.transfer_progress(move |stats: Progress<'_>| {
            pb.set_message(format!(
                "{}: objects {}/{}, {} bytes",
                label,
                stats.received_objects(),
                stats.total_objects(),
                stats.received_bytes()
            ));
            true
        });
    }

    /// Hook push progress into `cb`.
    pub fn attach_push(&self, cb: &mut RemoteCallbacks<'_>) {
        let pb = self.pb.clone();
        let label = self.label.clone();
        cb.push_transfer_progress(move |current, total, bytes| {
            pb.set_message(format!("{}: objects {}/{}, {} bytes", label, current, total, bytes));
        });
    }

    pub fn finish_ok(&self) {
        self.pb.set_style(ok_style());
        self.pb.finish_with_message(self.label.clone());
    }

    pub fn finish_err(&self, e: &dyn std::fmt::Display) {
        self.pb.set_style(err_style());
        self.pb.finish_with_message(format!("{} (error: {})", self.label, e));
    }
}
