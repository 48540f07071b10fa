//! Retry and failure-isolation policies shared by all adapters.

use crate::ProviderError;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// First backoff delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// Total attempts per adapter call (initial try included).
const MAX_ATTEMPTS: u32 = 3;

/// Runs `call` with exponential backoff on transient errors.
///
/// Permanent errors and exhausted attempts are returned to the caller
/// unchanged; retries are invisible to the session.
pub async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = BACKOFF_BASE;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    operation,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Consecutive permanent failures before the breaker opens.
const FAILURE_THRESHOLD: u32 = 3;
/// How long an open breaker rejects new work.
const COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Per-session circuit breaker over adapter calls.
///
/// Opens after [`FAILURE_THRESHOLD`] consecutive failures and fails
/// subsequent turns fast until the cooldown elapses. A success closes it.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_cooldown(COOLDOWN)
    }

    /// Breaker with a custom cooldown. Used by tests.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::default()),
            cooldown,
        }
    }

    /// Whether new work must be rejected right now.
    ///
    /// An expired cooldown closes the breaker as a side effect.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        match inner.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                inner.open_until = None;
                inner.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= FAILURE_THRESHOLD && inner.open_until.is_none() {
            tracing::warn!(
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
            inner.open_until = Some(Instant::now() + self.cooldown);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(ProviderError::Transient("flaky".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Transient("still flaky".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Permanent("denied".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn breaker_opens_after_three_failures_and_recovers() {
        let breaker = CircuitBreaker::with_cooldown(Duration::from_millis(20));
        assert!(!breaker.is_open());

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
