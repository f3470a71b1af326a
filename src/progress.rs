use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;
use std::time::Duration;

/// How often should progress bars be redrawn?
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Wraps an `indicatif::ProgressBar` so that callers never have to care whether progress output
/// is enabled.
pub struct Progress {
    inner: ProgressBar,
}

impl Progress {
    pub fn new_spinner<T: Into<Cow<'static, str>>>(message: T, enabled: bool) -> Self {
        let inner = if enabled {
            let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
                .expect("progress bar style template should compile");

            let inner = ProgressBar::new_spinner()
                .with_style(style)
                .with_message(message);
            inner.enable_steady_tick(PROGRESS_UPDATE_INTERVAL);

            inner
        } else {
            ProgressBar::hidden()
        };

        Progress { inner }
    }

    pub fn new_bar<T: Into<Cow<'static, str>>>(total: u64, message: T, enabled: bool) -> Self {
        let inner = if enabled {
            let style = ProgressStyle::with_template(
                "{msg}  {bar} {percent:>3}%  {pos}/{len}  [{elapsed_precise}]",
            )
            .expect("progress bar style template should compile");

            ProgressBar::new(total).with_style(style).with_message(message)
        } else {
            ProgressBar::hidden()
        };

        Progress { inner }
    }

    #[inline]
    pub fn inc(&mut self, amount: u64) {
        self.inner.inc(amount);
    }

    /// Run `f` with the progress display suspended, so that log lines don't tear the bar.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.inner.suspend(f)
    }

    pub fn finish_with_message<T: Into<Cow<'static, str>>>(&mut self, message: T) {
        self.inner.finish_with_message(message);
    }
}
