use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;

/// Non-success HTTP reply from a collaborator.
#[derive(Error, Debug)]
#[error("{service} request failed ({status}): {body}")]
pub struct StatusError {
    pub service: &'static str,
    pub status: StatusCode,
    pub body: String,
}

impl StatusError {
    /// Rate limits and server errors can clear up; other statuses will not.
    pub fn is_transient(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.status.is_server_error()
    }
}

/// Everything is retried except a reply whose status says trying again is pointless.
fn is_retryable(error: &anyhow::Error) -> bool {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StatusError>())
        .map_or(true, StatusError::is_transient)
}

/// Bounded exponential backoff for calls into network collaborators.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {:#}",
                        label,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.saturating_sub(1).min(10) as u32;
        let exp = self.base_delay.saturating_mul(1 << capped).min(self.max_delay);
        let jitter_cap = (exp.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        exp + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_stops_after_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = fast_policy(5)
            .run("flaky", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<()> = fast_policy(3)
            .run("down", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("still down"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    fn status_error(status: StatusCode) -> anyhow::Error {
        StatusError {
            service: "embeddings",
            status,
            body: "{}".to_string(),
        }
        .into()
    }

    async fn attempts_for(status: StatusCode) -> usize {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<()> = fast_policy(3)
            .run("status", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(status_error(status))
                }
            })
            .await;
        assert!(result.is_err());
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        assert_eq!(attempts_for(StatusCode::UNAUTHORIZED).await, 1);
        assert_eq!(attempts_for(StatusCode::BAD_REQUEST).await, 1);
    }

    #[tokio::test]
    async fn test_rate_limits_and_server_errors_are_retried() {
        assert_eq!(attempts_for(StatusCode::TOO_MANY_REQUESTS).await, 3);
        assert_eq!(attempts_for(StatusCode::SERVICE_UNAVAILABLE).await, 3);
    }

    #[test]
    fn test_status_error_survives_context() {
        let wrapped = status_error(StatusCode::FORBIDDEN).context("embed documents");
        assert!(!is_retryable(&wrapped));
        assert!(is_retryable(&anyhow::anyhow!("connection reset")));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        assert!(policy.backoff(8) < Duration::from_millis(500));
        assert!(policy.backoff(1) >= Duration::from_millis(100));
    }
}
