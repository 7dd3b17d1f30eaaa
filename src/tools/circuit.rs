//! 熔断器
//!
//! 每个工具名一个熔断器，跨会话共享。Closed 下在监控窗口内累计连续失败，
//! 达到阈值转 Open；Open 期间快速失败；reset_timeout 之后转 HalfOpen 只放行一个探测调用，
//! 探测成功回到 Closed，失败重新 Open。时间取自 tokio::time::Instant，测试里可暂停推进。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitSection;
use crate::core::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitSection::default())
    }
}

impl From<&CircuitSection> for CircuitBreakerConfig {
    fn from(section: &CircuitSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(section.reset_timeout_ms),
            monitoring_window: Duration::from_millis(section.monitoring_window_ms),
        }
    }
}

/// 状态迁移，交给执行器发出事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    tool: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(tool: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            tool: tool.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 临界区内不会 panic，中毒时直接沿用内部状态
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// 调用前申请放行；Open 未到期或 HalfOpen 探测已在途时返回 CircuitOpen。
    ///
    /// 放行凭证在未记录结果的情况下被丢弃（参数校验失败、调用方取消 future）时归还探测名额。
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, ToolError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, None, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    let transition = Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    };
                    Ok(CircuitPermit::new(self, Some(transition), true))
                } else {
                    Err(ToolError::CircuitOpen {
                        tool: self.tool.clone(),
                        retry_after_ms: (self.config.reset_timeout - elapsed).as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ToolError::CircuitOpen {
                        tool: self.tool.clone(),
                        retry_after_ms: 0,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(CircuitPermit::new(self, None, true))
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            _ => None,
        }
    }

    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.last_failure = Some(now);
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Closed => {
                let within_window = inner
                    .last_failure
                    .map(|t| now.saturating_duration_since(t) <= self.config.monitoring_window)
                    .unwrap_or(false);
                inner.failures = if within_window { inner.failures + 1 } else { 1 };
                inner.last_failure = Some(now);
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    Some(Transition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    })
                } else {
                    None
                }
            }
            // 熔断前已放行的并发调用稍后失败，不延长 Open
            CircuitState::Open => None,
        }
    }

    /// 归还探测名额，不计成功或失败
    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }
}

/// 一次放行的凭证
#[must_use = "dropping a permit without recording an outcome releases it"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    transition: Option<Transition>,
    probe: bool,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, transition: Option<Transition>, probe: bool) -> Self {
        Self {
            breaker,
            transition,
            probe,
            settled: false,
        }
    }

    /// 申请时发生的迁移（Open → HalfOpen）
    pub fn transition(&self) -> Option<Transition> {
        self.transition
    }

    /// 是否占用了 HalfOpen 的探测名额
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.record_success()
    }

    pub fn fail(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            tracing::debug!(tool = %self.breaker.tool, "half-open probe abandoned, releasing slot");
            self.breaker.release();
        }
    }
}

/// 按工具名管理熔断器
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// 取工具的熔断器，首次访问时按工具自带配置（缺省用全局配置）创建
    pub fn get_or_create(&self, tool: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(breakers.entry(tool.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                tool,
                config.unwrap_or_else(|| self.default_config.clone()),
            ))
        }))
    }

    pub fn state_of(&self, tool: &str) -> Option<CircuitState> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers.get(tool).map(|b| b.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "flaky",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(30),
                monitoring_window: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3);
        assert!(cb.record_failure().is_none());
        assert!(cb.record_failure().is_none());
        let t = cb.record_failure().unwrap();
        assert_eq!((t.from, t.to), (CircuitState::Closed, CircuitState::Open));

        match cb.try_acquire() {
            Err(ToolError::CircuitOpen { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 30_000),
            other => panic!("expected fast failure, got {other:?}"),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        let probe = cb.try_acquire().unwrap();
        assert_eq!(probe.transition().unwrap().to, CircuitState::HalfOpen);
        assert!(probe.is_probe());
        assert!(matches!(cb.try_acquire(), Err(ToolError::CircuitOpen { .. })));

        let t = probe.succeed().unwrap();
        assert_eq!((t.from, t.to), (CircuitState::HalfOpen, CircuitState::Closed));
        assert!(cb.try_acquire().unwrap().transition().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(31)).await;
        let probe = cb.try_acquire().unwrap();
        let t = probe.fail().unwrap();
        assert_eq!((t.from, t.to), (CircuitState::HalfOpen, CircuitState::Open));
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_slot() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        let probe = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err());
        drop(probe);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let next = cb.try_acquire().unwrap();
        assert!(next.is_probe());
        assert!(next.transition().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_closed_permit_keeps_probe_slot() {
        let cb = breaker(1);
        let stale = cb.try_acquire().unwrap();
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        let probe = cb.try_acquire().unwrap();
        drop(stale);
        assert!(cb.try_acquire().is_err());
        drop(probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let cb = breaker(2);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2);
        cb.record_failure();
        cb.record_success();
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breaker_per_tool() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("find_exercise", None);
        let b = registry.get_or_create("find_exercise", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.state_of("find_exercise"), Some(CircuitState::Closed));
        assert_eq!(registry.state_of("save_workout"), None);
    }
}
