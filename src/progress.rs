/// Progress reporting and cooperative cancellation for long index passes.
///
/// `is_active` is polled between chunks. Once it returns `false` the pass
/// stops after the current chunk; `cleanup_on_cancel` then decides whether the
/// entries written so far are deleted or kept.
pub trait Progress {
    /// Total amount of work, in rows.
    fn set_max(&mut self, max: u64);

    /// Report `progress` more rows as done.
    fn add_progress(&mut self, progress: u64);

    fn is_active(&self) -> bool {
        true
    }

    fn cleanup_on_cancel(&self) -> bool {
        false
    }
}

/// A [`Progress`] that counts rows and cancels after a fixed number of them.
///
/// Mostly useful in tests and as a reference implementation.
#[derive(Clone, Debug, Default)]
pub struct CountingProgress {
    pub max: u64,
    pub progress: u64,
    cancel_after: Option<u64>,
    cleanup: bool,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become inactive once at least `rows` rows were reported.
    pub fn cancel_after(mut self, rows: u64) -> Self {
        self.cancel_after = Some(rows);
        self
    }

    /// Whether a cancelled pass should delete what it wrote.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }
}

impl Progress for CountingProgress {
    fn set_max(&mut self, max: u64) {
        self.max = max;
    }

    fn add_progress(&mut self, progress: u64) {
        self.progress += progress;
    }

    fn is_active(&self) -> bool {
        self.cancel_after.is_none_or(|rows| self.progress < rows)
    }

    fn cleanup_on_cancel(&self) -> bool {
        self.cleanup
    }
}

#[cfg(test)]
mod tests {
    use super::{CountingProgress, Progress};

    #[test]
    fn counting_progress_cancels_after_threshold() {
        let mut progress = CountingProgress::new().cancel_after(3);
        progress.set_max(10);
        assert!(progress.is_active());
        progress.add_progress(2);
        assert!(progress.is_active());
        progress.add_progress(1);
        assert!(!progress.is_active());
        assert!(!progress.cleanup_on_cancel());
        assert!(CountingProgress::new().with_cleanup(true).cleanup_on_cancel());
    }

    #[test]
    fn counting_progress_without_threshold_stays_active() {
        let mut progress = CountingProgress::new();
        progress.add_progress(1_000_000);
        assert!(progress.is_active());
    }
}
