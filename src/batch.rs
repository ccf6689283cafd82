//! Best-effort batch execution and time-boxed confirmation
//!
//! Used by `massban`, `moveall` and `chunkban`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Tally of a best-effort batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Apply `op` to every item in order, counting failures instead of stopping
pub async fn run_best_effort<I, T, F, Fut, E>(items: I, mut op: F) -> BatchOutcome
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut outcome = BatchOutcome::default();
    for item in items {
        match op(item).await {
            Ok(()) => outcome.succeeded += 1,
            Err(e) => {
                debug!("Batch element skipped: {e}");
                outcome.failed += 1;
            }
        }
    }
    outcome
}

/// Result of waiting for an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// The acknowledgement source closed without confirming
    Declined,
    TimedOut,
}

/// Wait up to `window` for `ack` to resolve
///
/// `ack` yields `true` when the invoker confirmed. Only `Confirmed` should
/// let the guarded operation proceed.
pub async fn confirmation_gate<F>(ack: F, window: Duration) -> Confirmation
where
    F: Future<Output = bool>,
{
    match tokio::time::timeout(window, ack).await {
        Ok(true) => Confirmation::Confirmed,
        Ok(false) => Confirmation::Declined,
        Err(_) => Confirmation::TimedOut,
    }
}
