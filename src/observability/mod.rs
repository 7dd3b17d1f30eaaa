//! 可观测性：日志初始化与结构化事件
//!
//! 业务事件（工具调用、熔断状态迁移、匹配策略、澄清对话）通过注入的 EventSink 发出，
//! 默认实现写入 tracing；事件只用于观测，不参与控制流。

use std::sync::Mutex;

use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化 tracing：默认 info，可通过 RUST_LOG 覆盖（仅二进制入口调用）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 结构化业务事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoachEvent {
    ToolInvoked {
        tool: String,
        session_id: String,
    },
    ToolSucceeded {
        tool: String,
        duration_ms: u64,
        retries: u32,
    },
    ToolFailed {
        tool: String,
        error_kind: String,
        retries: u32,
    },
    ToolRetry {
        tool: String,
        attempt: u32,
        delay_ms: u64,
    },
    FallbackUsed {
        tool: String,
    },
    CircuitTransition {
        tool: String,
        from: String,
        to: String,
    },
    MatchStrategy {
        query: String,
        strategy: String,
        confidence: f64,
    },
    ClarificationRequested {
        session_id: String,
        intent: String,
    },
    ClarificationResolved {
        session_id: String,
        option: String,
    },
    ClarificationMismatch {
        session_id: String,
    },
    TurnCompleted {
        session_id: String,
        intent: String,
        confidence: f64,
        tool_calls: usize,
    },
}

impl CoachEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoachEvent::ToolInvoked { .. } => "tool_invoked",
            CoachEvent::ToolSucceeded { .. } => "tool_succeeded",
            CoachEvent::ToolFailed { .. } => "tool_failed",
            CoachEvent::ToolRetry { .. } => "tool_retry",
            CoachEvent::FallbackUsed { .. } => "fallback_used",
            CoachEvent::CircuitTransition { .. } => "circuit_transition",
            CoachEvent::MatchStrategy { .. } => "match_strategy",
            CoachEvent::ClarificationRequested { .. } => "clarification_requested",
            CoachEvent::ClarificationResolved { .. } => "clarification_resolved",
            CoachEvent::ClarificationMismatch { .. } => "clarification_mismatch",
            CoachEvent::TurnCompleted { .. } => "turn_completed",
        }
    }
}

/// 事件接收端：由构建器注入各组件
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoachEvent);
}

/// 默认 sink：失败类事件记 warn，其余记 debug / info
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CoachEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            CoachEvent::ToolFailed { .. } | CoachEvent::CircuitTransition { .. } => {
                tracing::warn!(event = event.name(), payload = %payload, "coach event");
            }
            CoachEvent::ToolRetry { .. } | CoachEvent::MatchStrategy { .. } => {
                tracing::debug!(event = event.name(), payload = %payload, "coach event");
            }
            _ => {
                tracing::info!(event = event.name(), payload = %payload, "coach event");
            }
        }
    }
}

/// 内存 sink：记录全部事件，供测试断言
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CoachEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CoachEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 按事件名过滤
    pub fn named(&self, name: &str) -> Vec<CoachEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: CoachEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
