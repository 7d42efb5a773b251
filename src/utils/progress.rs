use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Upload counters shared by every worker. The bar only moves on successful uploads.
pub struct UploadProgress {
    uploaded: AtomicUsize,
    failed: AtomicUsize,
    bar: ProgressBar,
}

impl UploadProgress {
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible && std::io::stderr().is_terminal() {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} records ({percent:>3}%) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            uploaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            bar,
        }
    }

    pub fn hidden(total: usize) -> Self {
        Self::new(total, false)
    }

    pub fn record_uploaded(&self) {
        self.uploaded.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    pub fn record_failed(&self) {
        let failed = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!("{failed} failed"));
    }

    pub fn uploaded(&self) -> usize {
        self.uploaded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
