//! Compare-and-swap retries for contended objects
//!
//! Shared cluster state (the admission queue, dependency back-references) is
//! written by many reconciliations at once. Writers re-read the latest
//! version, recompute their change and try again when the store reports a
//! conflict.

use crate::error::StoreError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff configuration for conflict retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial backoff delay (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum backoff delay (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Add up to half the delay again as random jitter
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 1000,
            multiplier: 2.0,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let base = raw.min(self.max_delay_ms as f64) as u64;
        let jitter = if self.jitter && base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Errors that can report an optimistic concurrency conflict
pub trait ConflictError {
    fn is_conflict(&self) -> bool;
}

impl ConflictError for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempts in `backoff` are used up
///
/// `op` must re-read whatever it modifies on every call.
pub async fn retry_on_conflict<T, E, F, Fut>(backoff: &BackoffConfig, mut op: F) -> Result<T, E>
where
    E: ConflictError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                let delay = backoff.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Write conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbops_types::ObjectKey;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            key: ObjectKey::new("default", "pg"),
            current: 2,
            expected: 1,
        }
    }

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            multiplier: 2.0,
            max_attempts: 3,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let backoff = no_jitter();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(40));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, StoreError> = retry_on_conflict(&no_jitter(), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(conflict())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_on_conflict(&no_jitter(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_on_conflict(&no_jitter(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Storage("disk full".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
