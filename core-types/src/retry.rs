// Copyright (c) James Kassemi, SC, US. All rights reserved.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base,
            max_delay_ms: max_delay_ms.max(base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Tuned for the document store: short waits, a handful of attempts.
    pub fn default_store() -> Self {
        Self::new(4, 50, 1_000, 0.2)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt.min(u32::MAX as usize) as u32);
        let capped = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        let with_jitter = if self.jitter_pct > 0.0 {
            let spread = (capped as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            capped.saturating_add_signed(delta)
        } else {
            capped
        };
        Duration::from_millis(with_jitter)
    }

    /// Retry `op` while `retryable` holds for the error. Non-retryable
    /// errors surface immediately; retryable ones surface once attempts are
    /// exhausted.
    pub async fn retry_if<F, Fut, T, E, P>(&self, retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(err);
                    }
                    sleep(self.next_delay(attempt - 1)).await;
                }
            }
        }
    }

    /// Retry `op` on every error until attempts are exhausted.
    pub async fn retry_async<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.retry_if(|_| true, op).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, pause};

    #[test]
    fn new_clamps_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 3.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn next_delay_doubles_then_caps() {
        let policy = RetryPolicy::new(6, 50, 300, 0.0);
        assert_eq!(policy.next_delay(0), Duration::from_millis(50));
        assert_eq!(policy.next_delay(1), Duration::from_millis(100));
        assert_eq!(policy.next_delay(2), Duration::from_millis(200));
        assert_eq!(policy.next_delay(3), Duration::from_millis(300));
        assert_eq!(policy.next_delay(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retry_if_gives_up_on_non_retryable_errors() {
        let policy = RetryPolicy::new(5, 10, 10, 0.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<(), &str> = policy
            .retry_if(
                |err: &&str| *err == "transient",
                |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err("fatal")
                    }
                },
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_if_recovers_from_transient_errors() {
        pause();
        let policy = RetryPolicy::new(3, 10, 10, 0.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let advancer = tokio::spawn(async {
            advance(Duration::from_millis(10)).await;
            advance(Duration::from_millis(10)).await;
        });

        let result: Result<&'static str, &str> = policy
            .retry_if(
                |_| true,
                |attempt| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if attempt < 2 { Err("transient") } else { Ok("ok") }
                    }
                },
            )
            .await;

        advancer.await.unwrap();
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_async_stops_after_max_attempts() {
        pause();
        let policy = RetryPolicy::new(2, 5, 5, 0.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let advancer = tokio::spawn(async { advance(Duration::from_millis(5)).await });

        let result: Result<(), &str> = policy
            .retry_async(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("unavailable")
                }
            })
            .await;

        advancer.await.unwrap();
        assert_eq!(result, Err("unavailable"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
