//! 工具执行器
//!
//! execute_tool(name, args, ctx) 的流程：查找工具 → 熔断放行 → 参数解析与校验 →
//! 带超时执行，按 RetryConfig 指数退避重试可重试错误 → 记录熔断结果 → 失败时尝试兜底。
//! 任何情况下都返回 ToolResult，不向上抛错；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::{timeout, Instant};

use crate::config::ToolsSection;
use crate::core::{ErrorKind, ToolError, TransientKind};
use crate::observability::{CoachEvent, EventSink};
use crate::tools::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState, RetryConfig, Tool,
    ToolContext, ToolMetadata, ToolParams, ToolRegistry, ToolResult, Transition,
};

pub struct ToolExecutor {
    registry: ToolRegistry,
    breakers: CircuitBreakerRegistry,
    default_retry: RetryConfig,
    timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, config: &ToolsSection, events: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::from(&config.circuit)),
            default_retry: RetryConfig::from(&config.retry),
            timeout: Duration::from_secs(config.tool_timeout_secs.max(1)),
            events,
        }
    }

    /// 覆盖单次调用超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.registry.tool_descriptions()
    }

    pub fn extension_schemas(&self) -> Vec<(String, Value)> {
        self.registry.extension_schemas()
    }

    pub fn circuit_state(&self, tool: &str) -> Option<CircuitState> {
        self.breakers.state_of(tool)
    }

    pub async fn execute_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        self.events.emit(CoachEvent::ToolInvoked {
            tool: name.to_string(),
            session_id: ctx.session_id.clone(),
        });

        let (outcome, retries, fallback_used) = self.run(name, args, ctx).await;

        let metadata = ToolMetadata {
            tool_name: name.to_string(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            retry_count: retries,
            timestamp: Utc::now(),
            fallback_used,
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "session_id": ctx.session_id,
            "ok": outcome.is_ok(),
            "outcome": outcome.as_ref().err().map(|e| e.kind().as_str()).unwrap_or("ok"),
            "retries": retries,
            "fallback_used": fallback_used,
            "duration_ms": metadata.execution_time_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match outcome {
            Ok(data) => {
                self.events.emit(CoachEvent::ToolSucceeded {
                    tool: name.to_string(),
                    duration_ms: metadata.execution_time_ms,
                    retries,
                });
                ToolResult::success(data, metadata)
            }
            Err(err) => {
                self.events.emit(CoachEvent::ToolFailed {
                    tool: name.to_string(),
                    error_kind: err.kind().as_str().to_string(),
                    retries,
                });
                ToolResult::failure(err, metadata)
            }
        }
    }

    /// 返回 (结果, 重试次数, 是否用了兜底)
    async fn run(&self, name: &str, args: Value, ctx: &ToolContext) -> (Result<Value, ToolError>, u32, bool) {
        let Some(tool) = self.registry.get(name) else {
            return (Err(ToolError::NotFound { tool: name.to_string() }), 0, false);
        };

        let breaker = self.breakers.get_or_create(name, tool.circuit_breaker_config());
        // 凭证在本函数返回或 future 被丢弃前一直持有，未记录结果时 Drop 归还探测名额
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(err) => return (Err(err), 0, false),
        };
        self.emit_transition(name, permit.transition());

        let params = match ToolParams::parse(name, args).and_then(|p| {
            tool.validate(&p, ctx)?;
            Ok(p)
        }) {
            Ok(params) => params,
            Err(err) => return (Err(err), 0, false),
        };

        let retry = tool.retry_config().unwrap_or_else(|| self.default_retry.clone());
        let (outcome, retries) = self.attempt_with_retry(name, tool.as_ref(), &params, ctx, &retry).await;
        self.record(name, permit, &outcome);

        match outcome {
            Ok(data) => (Ok(data), retries, false),
            Err(err) => match tool.fallback(&params, &err, ctx).await {
                Some(Ok(data)) => {
                    self.events.emit(CoachEvent::FallbackUsed {
                        tool: name.to_string(),
                    });
                    (Ok(data), retries, true)
                }
                Some(Err(fallback_err)) => {
                    tracing::debug!(tool = %name, error = %fallback_err, "fallback failed");
                    (Err(err), retries, false)
                }
                None => (Err(err), retries, false),
            },
        }
    }

    async fn attempt_with_retry(
        &self,
        name: &str,
        tool: &dyn Tool,
        params: &ToolParams,
        ctx: &ToolContext,
        retry: &RetryConfig,
    ) -> (Result<Value, ToolError>, u32) {
        let mut retries = 0;
        loop {
            let attempt = match timeout(self.timeout, tool.execute(params, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::transient(
                    TransientKind::Timeout,
                    format!("{name} exceeded {}ms", self.timeout.as_millis()),
                )),
            };
            match attempt {
                Ok(data) => return (Ok(data), retries),
                Err(err) if retries < retry.max_retries && retry.is_retryable(&err) => {
                    let delay = retry.delay_for(retries);
                    retries += 1;
                    self.events.emit(CoachEvent::ToolRetry {
                        tool: name.to_string(),
                        attempt: retries,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tracing::debug!(tool = %name, attempt = retries, error = %err, "retrying tool");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (Err(err), retries),
            }
        }
    }

    /// 只有表明依赖不健康的错误计入熔断；其余结果视为依赖可用
    fn record(&self, name: &str, permit: CircuitPermit<'_>, outcome: &Result<Value, ToolError>) {
        let unhealthy = match outcome {
            Ok(_) => false,
            Err(err) => matches!(
                err.kind(),
                ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Failed
            ),
        };
        let transition = if unhealthy { permit.fail() } else { permit.succeed() };
        self.emit_transition(name, transition);
    }

    fn emit_transition(&self, name: &str, transition: Option<Transition>) {
        if let Some(t) = transition {
            self.events.emit(CoachEvent::CircuitTransition {
                tool: name.to_string(),
                from: t.from.as_str().to_string(),
                to: t.to.as_str().to_string(),
            });
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
