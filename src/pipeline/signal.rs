use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// One-shot cancellation signal for a single pipeline run.
///
/// Any number of workers may call [`trip`](Self::trip); exactly one call
/// succeeds and the rest are no-ops. Idle workers wait on
/// [`tripped`](Self::tripped).
#[derive(Debug, Default)]
pub struct Tripwire {
    tripped: AtomicBool,
    attempts: AtomicUsize,
    token: CancellationToken,
}

impl Tripwire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn trip(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let won = self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired.
    pub async fn tripped(&self) {
        self.token.cancelled().await
    }

    /// How many times `trip` was called, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}
