// Bounded retries and bounded parallelism for network operations.
//
// Only registry calls (list, download, push) go through here. Reassembly and
// integrity checks are deterministic and never retried.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// Errors that can say whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Retry settings for one class of network operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Double the delay after every failure instead of keeping it fixed.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempts` tries with no delay in between.
    pub fn immediate(attempts: usize) -> Self {
        Self {
            max_attempts: attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential: false,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)))
            .with_factor(if self.exponential { 2.0 } else { 1.0 })
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Run `op`, retrying transient failures according to `policy`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    op.retry(policy.backoff())
        .when(|e: &E| e.is_transient())
        .notify(|e: &E, delay: Duration| {
            log::warn!("{what} failed: {e}. Retrying in {}ms.", delay.as_millis());
        })
        .await
}

/// Degree of parallelism for `items` independent operations.
pub fn parallelism(items: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(items)
        .max(1)
}

/// Run `f` over `items` with at most [`parallelism`] in flight.
///
/// Results come back in input order once every future has completed.
pub async fn for_each_bounded<I, T, F, Fut>(items: Vec<I>, f: F) -> Vec<T>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = T>,
{
    let limit = parallelism(items.len());
    futures::stream::iter(items)
        .map(f)
        .buffered(limit)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Flaky(true))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(2), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(5), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallelism_is_bounded_by_items() {
        assert_eq!(parallelism(0), 1);
        assert_eq!(parallelism(1), 1);
        assert!(parallelism(1000) <= 1000);
    }

    #[tokio::test]
    async fn bounded_map_keeps_order() {
        let out = for_each_bounded((0..20).collect(), |i: u32| async move { i * 2 }).await;
        assert_eq!(out, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 500);
    }
}
