use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded attempts with a fixed pause between them (no backoff)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// Returns the last error on exhaustion. `label` only shows up in logs.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but only errors accepted by `retryable`
    /// get another attempt; any other error is returned at once
    pub async fn run_if<T, E, F, Fut, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => {
                    tracing::warn!("{} failed: {} (not retried)", label, e);
                    return Err(e);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "{} failed: {} (attempt {}/{}), retrying in {:?}",
                        label,
                        e,
                        attempt,
                        attempts,
                        self.delay
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                    return Err(e);
                }
            }
        }
    }
}
