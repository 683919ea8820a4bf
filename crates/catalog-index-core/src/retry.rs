//! Retry combinator with exponential backoff and explicit error classification.
//!
//! A [`RetryPolicy`] pairs a retry ceiling and base delay with a pure
//! classifier mapping an error to [`RetryDecision`]. [`with_retry`] runs an
//! async action under a policy; the same combinator backs the index client's
//! timeout wrapper and the orchestrator's page-level retry, each with its own
//! classifier.
//!
//! Delay before retry `n` (1-based) is `base_delay * 2^(n-1)`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::IndexError;

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    Fatal,
}

/// Pure function deciding whether an error is worth another attempt.
pub type Classifier = fn(&anyhow::Error) -> RetryDecision;

/// How many times to retry, how long to wait, and what counts as transient.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub classifier: Classifier,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, classifier: Classifier) -> Self {
        Self {
            max_retries,
            base_delay,
            classifier,
        }
    }

    /// Backoff before retry number `retry` (1-based). The multiplier is fixed
    /// at doubling.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(30);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Source of delays between attempts.
///
/// The core never sleeps on its own; the binary injects a runtime-backed
/// implementation and tests inject one that records the requested delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper that returns immediately. Useful for callers that run with a
/// zero base delay.
pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

/// Final failure of a retried action.
#[derive(Debug)]
pub struct RetryFailure {
    /// The error from the last attempt, unchanged.
    pub error: anyhow::Error,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// `true` if the last error was retryable and the ceiling was reached;
    /// `false` if the classifier declared it fatal.
    pub exhausted: bool,
}

/// Run `action` until it succeeds, fails fatally, or runs out of retries.
///
/// Each retry is preceded by a `warn!` event carrying the operation name,
/// the attempt that failed, and the backoff about to be slept.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    name: &str,
    mut action: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match action().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if (policy.classifier)(&err) == RetryDecision::Fatal {
            return Err(RetryFailure {
                error: err,
                attempts: attempt,
                exhausted: false,
            });
        }
        if attempt > policy.max_retries {
            tracing::error!(
                operation = name,
                attempts = attempt,
                error = %format!("{:#}", err),
                "retry ceiling reached"
            );
            return Err(RetryFailure {
                error: err,
                attempts: attempt,
                exhausted: true,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            operation = name,
            attempt,
            max_attempts = policy.max_retries + 1,
            delay_secs = delay.as_secs_f64(),
            error = %format!("{:#}", err),
            "attempt failed, retrying after backoff"
        );
        sleeper.sleep(delay).await;
    }
}

// ============ Classifiers ============

fn index_error(err: &anyhow::Error) -> Option<&IndexError> {
    err.chain().find_map(|e| e.downcast_ref::<IndexError>())
}

/// Retryable only for timeout-class index failures.
pub fn classify_timeout(err: &anyhow::Error) -> RetryDecision {
    match index_error(err) {
        Some(IndexError::Timeout(_)) => RetryDecision::Retryable,
        _ => RetryDecision::Fatal,
    }
}

/// Page-level classifier for full syncs: index timeouts, index
/// unavailability, and storage serialization conflicts are transient;
/// everything else is fatal.
pub fn classify_sync_error(err: &anyhow::Error) -> RetryDecision {
    match index_error(err) {
        Some(IndexError::Timeout(_)) | Some(IndexError::Unavailable(_)) => {
            return RetryDecision::Retryable
        }
        _ => {}
    }
    if is_serialization_conflict(err) {
        RetryDecision::Retryable
    } else {
        RetryDecision::Fatal
    }
}

/// Phrases a storage backend uses when a transaction lost a serialization
/// race or a replica cancelled a query during recovery.
///
/// Matching error text is fragile: driver messages are not a stable
/// contract. No structured code is available from the store accessor, so
/// this stays a named heuristic that callers can replace with their own
/// classifier.
pub const SERIALIZATION_CONFLICT_MARKERS: &[&str] = &[
    "could not serialize access",
    "conflict with recovery",
    "database is locked",
];

static SERIALIZATION_CONFLICT: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = SERIALIZATION_CONFLICT_MARKERS
        .iter()
        .map(|m| regex::escape(m))
        .collect();
    Regex::new(&format!("(?i){}", alternatives.join("|"))).expect("static pattern is valid")
});

/// Heuristic: does any error in the chain read like a storage
/// serialization or recovery conflict?
pub fn is_serialization_conflict(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| SERIALIZATION_CONFLICT.is_match(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn timeout() -> anyhow::Error {
        IndexError::Timeout("read timed out".to_string()).into()
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), classify_timeout);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_classify_timeout_only_matches_timeouts() {
        assert_eq!(classify_timeout(&timeout()), RetryDecision::Retryable);
        let unavailable: anyhow::Error = IndexError::Unavailable("503".to_string()).into();
        assert_eq!(classify_timeout(&unavailable), RetryDecision::Fatal);
        assert_eq!(
            classify_timeout(&anyhow::anyhow!("boom")),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn test_classify_sync_error() {
        let unavailable: anyhow::Error = IndexError::Unavailable("503".to_string()).into();
        assert_eq!(classify_sync_error(&timeout()), RetryDecision::Retryable);
        assert_eq!(classify_sync_error(&unavailable), RetryDecision::Retryable);

        let conflict = anyhow::anyhow!(
            "ERROR: could not serialize access due to concurrent update"
        );
        assert_eq!(classify_sync_error(&conflict), RetryDecision::Retryable);

        let recovery = anyhow::anyhow!("canceling statement due to conflict with recovery")
            .context("fetching page 3");
        assert_eq!(classify_sync_error(&recovery), RetryDecision::Retryable);

        let status: anyhow::Error = IndexError::Status {
            status: 400,
            body: "mapper_parsing_exception".to_string(),
        }
        .into();
        assert_eq!(classify_sync_error(&status), RetryDecision::Fatal);
        assert_eq!(
            classify_sync_error(&anyhow::anyhow!("syntax error at or near")),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn test_classifier_sees_through_context() {
        let wrapped = timeout().context("bulk upsert");
        assert_eq!(classify_timeout(&wrapped), RetryDecision::Retryable);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), classify_timeout);
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = with_retry(&policy, &sleeper, "count", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(timeout())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_with_retry_fatal_error_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), classify_timeout);
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let failure = with_retry(&policy, &sleeper, "count", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("mapping conflict"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(failure.error.to_string(), "mapping conflict");
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_retry_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), classify_timeout);
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let failure = with_retry(&policy, &sleeper, "refresh", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(timeout())
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted);
        assert!(failure.error.downcast_ref::<IndexError>().is_some());
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }
}
