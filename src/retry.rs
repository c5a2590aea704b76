//! Retry with exponential backoff and jitter, wrapping a three-state
//! circuit breaker (Closed / Open / HalfOpen), sitting directly in front
//! of `RemoteBlobService` calls. No off-the-shelf breaker crate is used
//! (see DESIGN.md): this drives exactly one call shape, so it's specified
//! and implemented directly rather than as a standalone subsystem.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::error::{Result, WalgitError};
use crate::util::now_unix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { until: i64 },
    HalfOpen,
}

/// Guards calls to one remote dependency. Not generic over the call
/// itself — `call` takes any `Future`-returning closure, so one breaker
/// instance can wrap both `put` and `get` against the same
/// `RemoteBlobService`.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<State>,
    consecutive_failures: Mutex<u32>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, state: Mutex::new(State::Closed), consecutive_failures: Mutex::new(0) }
    }

    fn allow_call(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Closed => true,
            State::Open { until } => {
                if now_unix() >= until {
                    *state = State::HalfOpen;
                    debug!("circuit breaker: Open -> HalfOpen");
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => true,
        }
    }

    fn record_success(&self) {
        *self.consecutive_failures.lock().unwrap() = 0;
        let mut state = self.state.lock().unwrap();
        if *state != State::Closed {
            debug!("circuit breaker: -> Closed");
        }
        *state = State::Closed;
    }

    fn record_failure(&self) {
        let mut failures = self.consecutive_failures.lock().unwrap();
        *failures += 1;

        if *failures >= self.config.threshold {
            let until = now_unix() + (self.config.cool_down_ms / 1000) as i64;
            let mut state = self.state.lock().unwrap();
            warn!(failures = *failures, "circuit breaker: -> Open");
            *state = State::Open { until };
        }
    }

    /// Retry `op` with exponential backoff (base 100ms, capped at 5s) plus
    /// up-to-50% jitter, up to `config.max_retries` times, gated by the
    /// breaker's state. Only the final failure (after retries, or an
    /// immediate breaker-open rejection) is surfaced to the caller; prior
    /// attempts are logged at `debug`.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allow_call() {
            return Err(WalgitError::Remote("circuit breaker open".into()));
        }

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => {
                    self.record_success();
                    return Ok(v);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.record_failure();
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "remote call failed, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(8));
    let capped_ms = base_ms.min(5_000);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped_ms / 2);
    Duration::from_millis(capped_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let breaker = CircuitBreaker::new(BreakerConfig { max_retries: 3, ..BreakerConfig::default() });
        let calls = AtomicU32::new(0);
        let result = breaker
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, WalgitError>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let breaker = CircuitBreaker::new(BreakerConfig { max_retries: 3, ..BreakerConfig::default() });
        let calls = AtomicU32::new(0);
        let result = breaker
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(WalgitError::Remote("transient".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig { threshold: 1, max_retries: 0, cool_down_ms: 60_000, ..BreakerConfig::default() });

        let result = breaker.call(|| async { Err::<(), _>(WalgitError::Remote("boom".into())) }).await;
        assert!(result.is_err());

        // Breaker is now open; the next call is rejected without invoking `op`.
        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, WalgitError>(()) }
            })
            .await;
        assert!(matches!(result, Err(WalgitError::Remote(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }
}
