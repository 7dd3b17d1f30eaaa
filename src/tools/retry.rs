//! 重试策略：指数退避，延迟封顶

use std::time::Duration;

use crate::config::RetrySection;
use crate::core::{ErrorKind, ToolError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub retryable_errors: Vec<ErrorKind>,
}

impl RetryConfig {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 attempt 次重试前的等待（attempt 从 0 开始）：base × multiplier^attempt，不超过 max_delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp = attempt.min(i32::MAX as u32) as i32;
        let ms = base_ms * self.backoff_multiplier.max(1.0).powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn is_retryable(&self, err: &ToolError) -> bool {
        self.retryable_errors.contains(&err.kind())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            backoff_multiplier: section.backoff_multiplier,
            max_delay: Duration::from_millis(section.max_delay_ms),
            retryable_errors: vec![ErrorKind::Timeout, ErrorKind::Network, ErrorKind::RateLimited],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransientKind;

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            retryable_errors: vec![ErrorKind::Timeout],
        };
        assert_eq!(cfg.delay_for(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_only_declared_kinds_are_retryable() {
        let cfg = RetryConfig::default();
        assert!(cfg.is_retryable(&ToolError::transient(TransientKind::Network, "reset")));
        assert!(!cfg.is_retryable(&ToolError::validation("missing query")));
        assert!(!cfg.is_retryable(&ToolError::failed("boom")));
    }
}
