use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::app::config::LimitsConfig;

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次）
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            attempts: limits.retry_attempts.max(1),
            initial_delay: Duration::from_millis(limits.retry_initial_delay_ms),
            max_delay: Duration::from_millis(limits.retry_max_delay_ms),
            multiplier: 2.0,
        }
    }

    /// 第 `attempt` 次失败后的等待时间，attempt 从 1 开始
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        Duration::from_millis(ms as u64).min(self.max_delay)
    }
}

/// 重试异步操作，用尽次数后返回最后一次的错误
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} 在第 {} 次尝试成功", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "⚠️ {} 失败 (第 {}/{} 次): {}，{:?} 后重试...",
                    operation_name, attempt, policy.attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::from_limits(&LimitsConfig::default());
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(&fast(3), "op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("falha {}", n)) } else { Ok(n) }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(&fast(2), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("sempre".to_string())
        })
        .await;
        assert_eq!(result, Err("sempre".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
