//! 错误类型
//!
//! 工具边界的 ToolError 按 ErrorKind 决定是否重试；回合内部统一汇总为 CoachError，
//! 由 RecoveryEngine 转成面向用户的自然语言，不直接展示内部错误。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误种类：RetryConfig::retryable_errors 以此为单位声明可重试范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Network,
    RateLimited,
    NotFound,
    CircuitOpen,
    MatchNotFound,
    Failed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::MatchNotFound => "match_not_found",
            ErrorKind::Failed => "failed",
        }
    }
}

/// 瞬时错误的细分（超时 / 网络 / 限流）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    Network,
    RateLimited,
}

/// 工具执行错误
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    /// 参数缺失或格式错误，永不重试
    #[error("Invalid parameters: {message}")]
    Validation { message: String },

    #[error("Transient failure ({kind:?}): {message}")]
    Transient {
        #[serde(rename = "transient_kind")]
        kind: TransientKind,
        message: String,
    },

    #[error("Unknown tool: {tool}")]
    NotFound { tool: String },

    #[error("Circuit open for tool {tool}")]
    CircuitOpen { tool: String, retry_after_ms: u64 },

    /// 动作匹配未达到置信度下限，触发兜底动作选择
    #[error("No exercise matched '{query}'")]
    MatchNotFound { query: String },

    #[error("Tool failed: {message}")]
    Failed { message: String },
}

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        ToolError::Validation {
            message: message.into(),
        }
    }

    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        ToolError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Validation { .. } => ErrorKind::Validation,
            ToolError::Transient { kind, .. } => match kind {
                TransientKind::Timeout => ErrorKind::Timeout,
                TransientKind::Network => ErrorKind::Network,
                TransientKind::RateLimited => ErrorKind::RateLimited,
            },
            ToolError::NotFound { .. } => ErrorKind::NotFound,
            ToolError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ToolError::MatchNotFound { .. } => ErrorKind::MatchNotFound,
            ToolError::Failed { .. } => ErrorKind::Failed,
        }
    }
}

/// 补全服务错误（超时由补全服务自身负责，编排器只对错误种类作出反应）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Completion request timed out")]
    Timeout,

    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Completion API error: {0}")]
    Api(String),

    #[error("Invalid completion response: {0}")]
    InvalidResponse(String),
}

/// 会话存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Join(String),
}

/// 会话状态错误
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 计划解析错误：编排器捕获后替换为保守的默认计划
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unparsable plan: {0}")]
pub struct PlanningError(pub String);

/// 单个回合内可能出现的错误汇总
#[derive(Error, Debug)]
pub enum CoachError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Turn cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_map_to_error_kinds() {
        let err = ToolError::transient(TransientKind::RateLimited, "slow down");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        let err = ToolError::transient(TransientKind::Timeout, "deadline");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_tool_error_serializes_with_kind_tag() {
        let err = ToolError::NotFound {
            tool: "lift".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["tool"], "lift");
        let back: ToolError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
