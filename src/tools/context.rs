//! 工具调用上下文：会话、原话、意图实体以及同一计划中前序步骤的输出

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub user_id: String,
    pub utterance: String,
    pub entities: Value,
    /// (步骤名, 该步骤成功输出)，按完成顺序
    pub prior_outputs: Vec<(String, Value)>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_utterance(mut self, utterance: impl Into<String>) -> Self {
        self.utterance = utterance.into();
        self
    }

    pub fn with_entities(mut self, entities: Value) -> Self {
        self.entities = entities;
        self
    }

    /// 字符串类型的实体
    pub fn entity_str(&self, key: &str) -> Option<&str> {
        self.entities
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// 查询类工具的有效查询：显式参数 → exercise 实体 → 用户原话
    pub fn resolve_query<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit
            .filter(|q| !q.trim().is_empty())
            .or_else(|| self.entity_str("exercise"))
            .or_else(|| Some(self.utterance.as_str()).filter(|u| !u.trim().is_empty()))
    }
}
