use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    Exponential { base: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    /// 第 `attempt` 次失败后的等待时间（从 1 开始计数）
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                base.saturating_mul(factor)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::exponential(base),
        }
    }
}

/// 重试异步操作
///
/// `op` 收到当前尝试序号（从 1 开始）；只有 `should_retry` 返回 true 的错误才会重试。
pub async fn retry_async<F, Fut, T, E, P>(config: &RetryConfig, mut op: F, should_retry: P) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !should_retry(&e) {
                    return Err(e);
                }
                let delay = config.backoff.delay_at(attempt);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "操作失败，稍后重试"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<u32, String> = retry_async(
            &RetryConfig::new(5, Duration::from_millis(100)),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_async(
            &RetryConfig::new(3, Duration::from_millis(10)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_async(
            &RetryConfig::new(5, Duration::from_millis(10)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unauthorized") }
            },
            |e| *e != "unauthorized",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
