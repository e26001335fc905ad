//! Retry driver for upstream calls
//!
//! Wraps a fallible async operation and retries it with exponential backoff while the
//! failure is transient. Anything else propagates on the first failure without
//! touching the retry budget: retrying a policy violation or malformed input would
//! only repeat the same answer.

mod backoff;

pub use backoff::{Backoff, JitterSource, NoJitter, RandomJitter};

use crate::config::RetryConfig;
use crate::upstream::Classify;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Status codes that are always retried
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Returned when a shutdown signal interrupts a backoff wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("retry cancelled by shutdown")]
pub struct RetryCancelled;

/// Retry budget and schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
                Duration::from_millis(config.jitter_ms),
            ),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        if let Some(status) = err.status() {
            if self.retryable_statuses.contains(&status) {
                return true;
            }
        }
        err.kind().is_transient()
    }
}

/// Bookkeeping for a single outer call
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Retries performed so far
    pub attempt: u32,
    pub accumulated_delay: Duration,
}

/// Executes operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the jitter source (tests inject [`NoJitter`])
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// The final error is returned unchanged. Dropping the returned future during a
    /// backoff wait abandons the call without another attempt.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut state = RetryState::default();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.next_delay(&mut state, &err) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(err),
                },
            }
        }
    }

    /// Like [`Retrier::run`], but a `true` on `shutdown` ends any pending backoff wait
    /// and returns [`RetryCancelled`] without firing the next attempt.
    pub async fn run_until_shutdown<T, E, F, Fut>(
        &self,
        mut op: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display + From<RetryCancelled>,
    {
        let mut state = RetryState::default();
        loop {
            if *shutdown.borrow() {
                return Err(RetryCancelled.into());
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.next_delay(&mut state, &err) {
                    Some(delay) => {
                        if wait_or_shutdown(delay, &mut shutdown).await {
                            tracing::info!(
                                attempt = state.attempt,
                                "Shutdown requested during backoff, abandoning retries"
                            );
                            return Err(RetryCancelled.into());
                        }
                    }
                    None => return Err(err),
                },
            }
        }
    }

    fn next_delay<E: Classify + Display>(
        &self,
        state: &mut RetryState,
        err: &E,
    ) -> Option<Duration> {
        if !self.policy.is_retryable(err) {
            tracing::debug!(kind = ?err.kind(), error = %err, "Non-retryable failure");
            return None;
        }

        if state.attempt >= self.policy.max_retries {
            tracing::warn!(
                retries = state.attempt,
                total_delay_ms = state.accumulated_delay.as_millis() as u64,
                error = %err,
                "Retry budget exhausted"
            );
            return None;
        }

        let delay = self.policy.backoff.delay(state.attempt, self.jitter.as_ref());
        state.attempt += 1;
        state.accumulated_delay += delay;

        tracing::warn!(
            attempt = state.attempt,
            max_retries = self.policy.max_retries,
            backoff_ms = delay.as_millis() as u64,
            kind = ?err.kind(),
            error = %err,
            "Retryable upstream failure, backing off"
        );
        Some(delay)
    }
}

/// Returns `true` when shutdown fired before the delay elapsed.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // sender gone, nobody can cancel any more
                    (&mut sleep).await;
                    return false;
                }
                if *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamFailure;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Zero jitter that counts how many waits were scheduled
    #[derive(Clone, Default)]
    struct CountingJitter(Arc<AtomicU32>);

    impl JitterSource for CountingJitter {
        fn sample(&self, _bound: Duration) -> Duration {
            self.0.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        }
    }

    fn retrier() -> (Retrier, Arc<AtomicU32>) {
        let jitter = CountingJitter::default();
        let waits = jitter.0.clone();
        (Retrier::default().with_jitter(jitter), waits)
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_service_unavailable() {
        let (retrier, waits) = retrier();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<&str, UpstreamFailure> = retrier
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UpstreamFailure::new("service unavailable").with_status(503))
                } else {
                    Ok("quote")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "quote");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(waits.load(Ordering::SeqCst), 2);
        // 1s + 2s with no jitter
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_propagates_immediately() {
        let (retrier, waits) = retrier();
        let calls = AtomicU32::new(0);

        let result: Result<(), UpstreamFailure> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamFailure::new("invalid params: malformed address").with_status(400))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(waits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error_unchanged() {
        let (retrier, waits) = retrier();
        let calls = AtomicU32::new(0);

        let result: Result<(), UpstreamFailure> = retrier
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamFailure::new(format!("rate limit #{n}")).with_status(429))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(waits.load(Ordering::SeqCst), 3);
        assert_eq!(err.message, "rate limit #3");
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_without_status_are_retried() {
        let (retrier, waits) = retrier();
        let calls = AtomicU32::new(0);

        let result: Result<u32, UpstreamFailure> = retrier
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpstreamFailure::new("connect failed").with_code("ETIMEDOUT"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(waits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_skips_next_attempt() {
        let (retrier, _waits) = retrier();
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send(true);
            // keep the sender alive past the backoff deadline
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let counter = calls.clone();
        let result: Result<(), Error> = retrier
            .run_until_shutdown(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(UpstreamFailure::new("bad gateway").with_status(502).into())
                    }
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_ms: 0,
            retryable_statuses: vec![503],
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff.base_delay(2), Duration::from_millis(800));
        assert!(policy.is_retryable(&UpstreamFailure::new("x").with_status(503)));
        assert!(!policy.is_retryable(&UpstreamFailure::new("x").with_status(502)));
    }
}
