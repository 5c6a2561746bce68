//! Per-process generation state shared between the dispatcher and pipelines.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Step counters behind the progress display.
///
/// One generation is in flight per session, so the counters describe that
/// single run; `clear` resets them once a request completes so the next one
/// starts from a clean display.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_steps: AtomicU64,
    done_steps: AtomicU64,
}

impl ProgressTracker {
    pub fn begin(&self, total_steps: u64) {
        self.total_steps.store(total_steps, Ordering::SeqCst);
        self.done_steps.store(0, Ordering::SeqCst);
    }

    pub fn advance(&self, steps: u64) {
        self.done_steps.fetch_add(steps, Ordering::SeqCst);
    }

    /// Returns `(done, total)`.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.done_steps.load(Ordering::SeqCst),
            self.total_steps.load(Ordering::SeqCst),
        )
    }

    pub fn clear(&self) {
        self.total_steps.store(0, Ordering::SeqCst);
        self.done_steps.store(0, Ordering::SeqCst);
    }
}

/// Interrupt/stop signals and progress for the active generation.
///
/// Passed by reference to the dispatcher and down into pipelines; pipelines
/// are the ones expected to poll the flags between work units. The
/// surrounding application guarantees at most one active generation per
/// session.
#[derive(Debug, Default)]
pub struct GenerationSession {
    interrupt: AtomicBool,
    stop_after_current: AtomicBool,
    pub progress: ProgressTracker,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an immediate interrupt of the active generation.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Requests a stop once the current batch finishes.
    pub fn stop_after_current(&self) {
        self.stop_after_current.store(true, Ordering::SeqCst);
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_after_current.load(Ordering::SeqCst)
    }

    /// Clears both signals ahead of a new generation.
    pub fn reset_signals(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
        self.stop_after_current.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_toggle_and_reset() {
        let session = GenerationSession::new();
        assert!(!session.interrupted());
        assert!(!session.stop_requested());

        session.interrupt();
        session.stop_after_current();
        assert!(session.interrupted());
        assert!(session.stop_requested());

        session.reset_signals();
        assert!(!session.interrupted());
        assert!(!session.stop_requested());
    }

    #[test]
    fn progress_counts_and_clears() {
        let session = GenerationSession::new();
        session.progress.begin(20);
        session.progress.advance(5);
        session.progress.advance(5);
        assert_eq!(session.progress.snapshot(), (10, 20));

        session.progress.clear();
        assert_eq!(session.progress.snapshot(), (0, 0));
    }
}
