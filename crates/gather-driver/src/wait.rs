//! Cancellable waits.
//!
//! Every wait the driver arms during a navigation lives inside a
//! [`WaitScope`]. Racing the scope against a ceiling cancels it on the way
//! out, so timers and listeners owned by the losing side stop together.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a wait ended without its event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    Cancelled,
    /// The notification source went away.
    Closed,
}

/// Result of [`race_with_ceiling`].
#[derive(Debug, PartialEq, Eq)]
pub enum Raced<T> {
    Ready(T),
    TimedOut,
}

#[derive(Clone, Debug, Default)]
pub struct WaitScope {
    token: CancellationToken,
}

impl WaitScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), WaitError> {
        if duration.is_zero() {
            return self.check();
        }
        tokio::select! {
            _ = self.token.cancelled() => Err(WaitError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn check(&self) -> Result<(), WaitError> {
        if self.is_cancelled() {
            Err(WaitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Races `ready` against `ceiling`. The scope is cancelled whichever side
/// wins.
pub async fn race_with_ceiling<F>(scope: &WaitScope, ready: F, ceiling: Duration) -> Raced<F::Output>
where
    F: Future,
{
    let outcome = tokio::select! {
        biased;
        value = ready => Raced::Ready(value),
        _ = tokio::time::sleep(ceiling) => Raced::TimedOut,
    };
    scope.cancel();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn ready_side_wins_and_cancels_scope() {
        let scope = WaitScope::new();
        let listener = scope.clone();
        let ready = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            7
        };
        let start = Instant::now();
        let outcome = race_with_ceiling(&scope, ready, Duration::from_secs(1)).await;
        assert_eq!(outcome, Raced::Ready(7));
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        assert!(listener.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_wins_over_a_wait_that_never_finishes() {
        let scope = WaitScope::new();
        let pending = {
            let scope = scope.clone();
            async move { scope.sleep(Duration::from_secs(3600)).await }
        };
        let outcome = race_with_ceiling(&scope, pending, Duration::from_millis(500)).await;
        assert_eq!(outcome, Raced::TimedOut);
        assert_eq!(scope.sleep(Duration::from_millis(1)).await, Err(WaitError::Cancelled));
    }
}
