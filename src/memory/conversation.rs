//! 对话消息
//!
//! 会话历史中的单条消息：角色、内容、时间戳，以及可选的工具调用 / 工具结果载荷。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致，外加 Tool 用于记录工具结果）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// 工具调用 / 工具结果载荷
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolPayload {
    Call { tool: String, args: Value },
    Result { tool: String, success: bool, data: Value },
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_payload: Option<ToolPayload>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_payload: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// 工具结果消息：content 为简短摘要，完整数据放在载荷里
    pub fn tool_result(tool: &str, success: bool, summary: impl Into<String>, data: Value) -> Self {
        Self {
            tool_payload: Some(ToolPayload::Result {
                tool: tool.to_string(),
                success,
                data,
            }),
            ..Self::new(Role::Tool, summary)
        }
    }

    pub fn with_payload(mut self, payload: ToolPayload) -> Self {
        self.tool_payload = Some(payload);
        self
    }
}
