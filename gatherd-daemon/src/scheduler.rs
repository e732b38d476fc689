//! Self-rescheduling poll timer.
//!
//! Each scheduled cycle owns a [`CancellationToken`]. Scheduling a new cycle
//! cancels the previous token, and [`PollScheduler::cancel`] cancels the
//! current one. The token is handed to the tick callback so it can refuse to
//! run once cancelled; callers cancel and check under the same lock, which
//! rules out a tick firing after `cancel` returns.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use gatherd_core::types::DEFAULT_GATHER_INTERVAL;

pub struct PollScheduler {
    handle: Handle,
    pending: Option<CancellationToken>,
}

impl PollScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: None,
        }
    }

    /// Run `tick` on the blocking pool after `delay`, replacing any cycle
    /// already pending.
    pub fn schedule<F>(&mut self, delay: Duration, tick: F)
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        self.cancel();
        let token = CancellationToken::new();
        let fired = token.clone();
        let spent = token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = fired.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = tokio::task::spawn_blocking(move || tick(fired)).await {
                        // No next cycle was scheduled; stop reporting one.
                        spent.cancel();
                        tracing::error!(error = %err, "poll tick panicked");
                    }
                }
            }
        });
        self.pending = Some(token);
    }

    /// Cancel the pending cycle, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Convert a configured interval into a delay, falling back to the default
/// for values that are not finite and positive.
pub fn interval_from_seconds(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_GATHER_INTERVAL))
    } else {
        Duration::from_secs_f64(DEFAULT_GATHER_INTERVAL)
    }
}
