//! Restoring a session at application start.
//!
//! A freshly started client may race the backend coming up or a keychain
//! that is slow to unlock, so restore is retried for a bounded time.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Result of one restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A validated or freshly refreshed session is installed.
    Restored,
    /// Nothing usable was persisted.
    NoCredentials,
    /// The backend could not be reached or answered with a non-auth failure.
    Unavailable,
    /// The backend rejected the stored credentials.
    Rejected,
}

impl RestoreOutcome {
    pub fn is_restored(self) -> bool {
        matches!(self, Self::Restored)
    }

    /// Whether another attempt could still succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::NoCredentials | Self::Unavailable)
    }
}

/// Anything that can make a single restore attempt.
#[async_trait]
pub trait SessionRestorer: Send + Sync {
    async fn attempt_restore(&self) -> RestoreOutcome;
}

/// Time allowed for restoring at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreBudget {
    pub total: Duration,
    pub backoff: Duration,
}

impl RestoreBudget {
    pub fn new(total: Duration, backoff: Duration) -> Self {
        Self { total, backoff }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.restore_budget(), config.restore_backoff())
    }
}

impl Default for RestoreBudget {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Retry restore until it succeeds, is definitively rejected, or the budget
/// runs out. Returns whether a session is installed.
///
/// An attempt still running at the deadline is abandoned, so the call never
/// outlives `budget.total` by more than one poll.
pub async fn restore_at_startup<R>(restorer: &R, budget: RestoreBudget) -> bool
where
    R: SessionRestorer + ?Sized,
{
    let deadline = Instant::now() + budget.total;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = match timeout(remaining, restorer.attempt_restore()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(attempts, budget_ms = budget.total.as_millis() as u64, "Startup restore timed out");
                return false;
            }
        };
        debug!(attempts, ?outcome, "Startup restore attempt");

        if !outcome.is_retryable() {
            info!(attempts, ?outcome, "Startup restore finished");
            return outcome.is_restored();
        }

        let now = Instant::now();
        if now + budget.backoff >= deadline {
            info!(attempts, ?outcome, "Startup restore budget exhausted");
            return false;
        }
        sleep(budget.backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Plays back scripted outcomes, then repeats the last one.
    struct Scripted {
        outcomes: Mutex<VecDeque<RestoreOutcome>>,
        last: RestoreOutcome,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(outcomes: &[RestoreOutcome]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                last: *outcomes.last().unwrap(),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionRestorer for Scripted {
        async fn attempt_restore(&self) -> RestoreOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().unwrap().pop_front().unwrap_or(self.last)
        }
    }

    fn budget() -> RestoreBudget {
        RestoreBudget::new(Duration::from_millis(2000), Duration::from_millis(100))
    }

    #[test]
    fn test_outcome_classification() {
        assert!(RestoreOutcome::Restored.is_restored());
        assert!(!RestoreOutcome::Restored.is_retryable());
        assert!(!RestoreOutcome::Rejected.is_retryable());
        assert!(RestoreOutcome::NoCredentials.is_retryable());
        assert!(RestoreOutcome::Unavailable.is_retryable());
    }

    #[test]
    fn test_default_budget_matches_config() {
        let budget = RestoreBudget::default();
        assert_eq!(budget.total, Duration::from_millis(2000));
        assert_eq!(budget.backoff, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let restorer = Scripted::new(&[RestoreOutcome::Restored]);
        assert!(restore_at_startup(&restorer, budget()).await);
        assert_eq!(restorer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_backend_comes_up() {
        let restorer = Scripted::new(&[
            RestoreOutcome::Unavailable,
            RestoreOutcome::Unavailable,
            RestoreOutcome::Restored,
        ]);
        assert!(restore_at_startup(&restorer, budget()).await);
        assert_eq!(restorer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let restorer = Scripted::new(&[RestoreOutcome::Rejected]);
        assert!(!restore_at_startup(&restorer, budget()).await);
        assert_eq!(restorer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_within_budget() {
        let restorer = Scripted::new(&[RestoreOutcome::NoCredentials]);
        let started = Instant::now();
        assert!(!restore_at_startup(&restorer, budget()).await);

        let calls = restorer.calls();
        assert!(calls >= 2, "expected retries, got {}", calls);
        assert!(calls <= 20, "expected at most 20 attempts, got {}", calls);
        assert!(started.elapsed() <= Duration::from_millis(2000));
    }

    /// Never finishes an attempt within the budget.
    struct Stalled {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SessionRestorer for Stalled {
        async fn attempt_restore(&self) -> RestoreOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(5)).await;
            RestoreOutcome::Restored
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_is_cut_off_at_the_deadline() {
        let restorer = Stalled {
            calls: AtomicU32::new(0),
        };
        let started = Instant::now();
        assert!(!restore_at_startup(&restorer, budget()).await);
        assert_eq!(restorer.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() <= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_means_single_attempt() {
        let restorer = Scripted::new(&[RestoreOutcome::Unavailable]);
        let budget = RestoreBudget::new(Duration::ZERO, Duration::from_millis(100));
        assert!(!restore_at_startup(&restorer, budget).await);
        assert_eq!(restorer.calls(), 1);
    }
}
