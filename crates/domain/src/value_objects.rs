use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 溢出时的退避上限（约10年）
const MAX_BACKOFF_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// 指数退避重试策略：第 n 次失败后等待 backoff_base^n 秒
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { backoff_base: 2 }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exponent = attempts.max(0) as u32;
        let seconds = u64::from(self.backoff_base)
            .checked_pow(exponent)
            .and_then(|secs| i64::try_from(secs).ok())
            .map_or(MAX_BACKOFF_SECONDS, |secs| secs.min(MAX_BACKOFF_SECONDS));
        Duration::seconds(seconds)
    }
}

/// 一次失败处理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureTransition {
    Retry {
        attempt: i32,
        delay: Duration,
        next_retry_at: DateTime<Utc>,
    },
    Dead {
        attempts: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_integer_power_of_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::seconds(1));
        assert_eq!(policy.delay_for(1), Duration::seconds(2));
        assert_eq!(policy.delay_for(2), Duration::seconds(4));
        assert_eq!(policy.delay_for(5), Duration::seconds(32));

        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay_for(3), Duration::seconds(27));
    }

    #[test]
    fn test_delay_saturates_on_overflow() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.delay_for(40), Duration::seconds(MAX_BACKOFF_SECONDS));
        assert!(policy.delay_for(30) <= Duration::seconds(MAX_BACKOFF_SECONDS));
    }
}
