//! 工具注册表
//!
//! 所有工具实现 Tool trait，由 ToolRegistry 按名注册与查找（同名重复注册覆盖旧的），
//! ToolExecutor 在调用时负责参数解析、熔断、超时、重试与兜底。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{CircuitBreakerConfig, RetryConfig, ToolContext, ToolParams};

/// 工具 trait：名称、描述（供 LLM 理解）、可选的重试/熔断配置、校验、执行与兜底
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于计划步骤中的 tools 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象。只有外部注册的工具会把它写进规划提示
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 返回 None 时使用执行器的全局重试配置
    fn retry_config(&self) -> Option<RetryConfig> {
        None
    }

    /// 返回 None 时使用全局熔断配置
    fn circuit_breaker_config(&self) -> Option<CircuitBreakerConfig> {
        None
    }

    /// 执行前校验；失败不重试、不计入熔断
    fn validate(&self, _params: &ToolParams, _ctx: &ToolContext) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// 重试耗尽后的兜底；None 表示没有兜底
    async fn fallback(
        &self,
        _params: &ToolParams,
        _error: &ToolError,
        _ctx: &ToolContext,
    ) -> Option<Result<Value, ToolError>> {
        None
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的可用工具段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }

    /// 外部注册工具的 (name, 参数 schema)
    pub fn extension_schemas(&self) -> Vec<(String, Value)> {
        self.tools
            .iter()
            .filter(|(name, _)| !ToolParams::is_builtin(name))
            .map(|(name, tool)| (name.clone(), tool.parameters_schema()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn execute(&self, _params: &ToolParams, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(Value::String(self.1.to_string()))
        }
    }

    struct LogMeal;

    #[async_trait]
    impl Tool for LogMeal {
        fn name(&self) -> &str {
            "log_meal"
        }

        fn description(&self) -> &str {
            "record a meal"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"calories": {"type": "integer"}},
                "required": ["calories"]
            })
        }

        async fn execute(&self, _params: &ToolParams, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_extension_schemas_skip_builtin_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("find_exercise", "built in"));
        registry.register(LogMeal);
        let schemas = registry.extension_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].0, "log_meal");
        assert_eq!(schemas[0].1["required"][0], "calories");
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("log_meal", "v1"));
        registry.register(Named("log_meal", "v2"));
        assert_eq!(registry.tool_names(), vec!["log_meal".to_string()]);
        assert_eq!(registry.get("log_meal").unwrap().description(), "v2");
        assert!(registry.get("missing").is_none());
    }
}
