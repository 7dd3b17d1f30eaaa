//! 工具调用 JSON Schema（schemars 生成），拼入意图分析 prompt 以约束 LLM 给出的参数

use schemars::schema_for;

use crate::tools::ToolParams;

/// 所有内置工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolParams);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
