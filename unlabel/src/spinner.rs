//! Terminal progress indicator backed by an indicatif spinner

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use unlabel_core::transcript::ProgressObserver;
use unlabel_core::Progress;

const IDLE_MESSAGE: &str = "Analyzing...";

/// Shows a spinner while a request is busy, with the current step as its message
#[derive(Default)]
pub struct Spinner {
    bar: Mutex<Option<ProgressBar>>,
}

impl Spinner {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&mut Option<ProgressBar>)) {
        let mut bar = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *bar);
    }
}

impl ProgressObserver for Spinner {
    fn set_busy(&self, busy: bool) {
        self.with_bar(|bar| {
            if busy {
                if bar.is_none() {
                    let pb = ProgressBar::new_spinner();
                    pb.set_style(
                        ProgressStyle::default_spinner()
                            .template("{spinner:.green} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    pb.set_message(IDLE_MESSAGE);
                    pb.enable_steady_tick(Duration::from_millis(100));
                    *bar = Some(pb);
                }
            } else if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        });
    }

    fn set_progress(&self, progress: Option<Progress>) {
        self.with_bar(|bar| {
            if let Some(pb) = bar.as_ref() {
                match progress {
                    Some(p) => pb.set_message(format_progress(&p)),
                    None => pb.set_message(IDLE_MESSAGE),
                }
            }
        });
    }
}

fn format_progress(progress: &Progress) -> String {
    // Servers may omit the step count.
    let counter = if progress.total == 0 {
        format!("[{}]", progress.step)
    } else {
        format!("[{}/{}]", progress.step, progress.total)
    };
    if progress.message.is_empty() {
        counter
    } else {
        format!("{} {}", counter, progress.message)
    }
}
