//! 工具执行结果：成功数据与错误互斥，附带执行元数据

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub execution_time_ms: u64,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Data(Value),
    Error(ToolError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    outcome: Outcome,
    pub metadata: ToolMetadata,
}

impl ToolResult {
    pub fn success(data: Value, metadata: ToolMetadata) -> Self {
        Self {
            outcome: Outcome::Data(data),
            metadata,
        }
    }

    pub fn failure(error: ToolError, metadata: ToolMetadata) -> Self {
        Self {
            outcome: Outcome::Error(error),
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Data(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Data(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ToolError> {
        match &self.outcome {
            Outcome::Data(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Value, ToolError> {
        match self.outcome {
            Outcome::Data(v) => Ok(v),
            Outcome::Error(e) => Err(e),
        }
    }

    /// 工具在数据里给出的 message 字段（用于拼装回复）
    pub fn message(&self) -> Option<&str> {
        self.data()?.get("message")?.as_str()
    }
}
