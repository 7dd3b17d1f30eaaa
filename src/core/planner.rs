//! 意图与计划
//!
//! 把补全服务返回的意图 JSON 解析为 IntentAnalysis。输出可能包在 ```json 代码块里，
//! 也可能前后夹带说明文字，先截取 JSON 再解析；解析或校验失败返回 PlanningError，
//! 由编排器换成保守的默认计划。

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::PlanningError;
use crate::memory::StepSpec;
use crate::tools::{ModField, ModOp};

/// 默认计划的意图名
pub const GENERAL_INTENT: &str = "general";

fn default_confidence() -> f64 {
    0.5
}

/// 对当前训练计划的修改请求
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Modification {
    pub operation: ModOp,
    #[serde(alias = "factor", alias = "value")]
    pub amount: f64,
    #[serde(default)]
    pub field: Option<ModField>,
    #[serde(default)]
    pub exercise: Option<String>,
}

impl Modification {
    /// 不含 field 的基础工具参数
    pub fn base_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("operation".into(), serde_json::json!(self.operation));
        args.insert("amount".into(), serde_json::json!(self.amount));
        if let Some(exercise) = &self.exercise {
            args.insert("exercise".into(), Value::String(exercise.clone()));
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannedStep {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "required_tools")]
    pub tools: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 按工具名给出的参数；单工具步骤也可直接给参数对象
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl PlannedStep {
    pub fn args_for(&self, tool: &str) -> Value {
        match self.args.get(tool) {
            Some(v) => v.clone(),
            None if self.tools.len() == 1
                && !self.args.is_empty()
                && !self.args.values().all(Value::is_object) =>
            {
                Value::Object(self.args.clone())
            }
            None => Value::Null,
        }
    }

    pub fn spec(&self) -> StepSpec {
        StepSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            required_tools: self.tools.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentAnalysis {
    pub intent: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub modification: Option<Modification>,
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
}

impl IntentAnalysis {
    /// 无法理解时的保守计划：普通对话，不调用工具
    pub fn default_plan() -> Self {
        Self {
            intent: GENERAL_INTENT.to_string(),
            confidence: default_confidence(),
            entities: Map::new(),
            modification: None,
            steps: Vec::new(),
        }
    }

    /// 有计划步骤或修改请求才算可执行意图
    pub fn is_actionable(&self) -> bool {
        !self.steps.is_empty() || self.modification.is_some()
    }

    /// 修改请求缺少 field，需要澄清
    pub fn needs_field_clarification(&self) -> bool {
        self.modification
            .as_ref()
            .map(|m| m.field.is_none())
            .unwrap_or(false)
    }
}

/// 截取输出中的 JSON 对象（```json 代码块优先，其次首个 '{' 到最后一个 '}'）
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析并校验意图 JSON：步骤名唯一，依赖只能指向更早的步骤，置信度夹到 [0,1]，步骤数截断到 max_steps
pub fn parse_intent(output: &str, max_steps: usize) -> Result<IntentAnalysis, PlanningError> {
    let json = extract_json(output).ok_or_else(|| PlanningError("no JSON object found".into()))?;
    let mut analysis: IntentAnalysis =
        serde_json::from_str(json).map_err(|e| PlanningError(format!("{e}: {json}")))?;

    if analysis.intent.trim().is_empty() {
        return Err(PlanningError("empty intent".into()));
    }
    if !analysis.confidence.is_finite() {
        analysis.confidence = default_confidence();
    }
    analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    if let Some(m) = &analysis.modification {
        if !m.amount.is_finite() {
            return Err(PlanningError("modification amount is not a number".into()));
        }
    }
    if analysis.steps.len() > max_steps {
        tracing::warn!(steps = analysis.steps.len(), max_steps, "plan truncated");
        analysis.steps.truncate(max_steps);
    }

    let mut seen = HashSet::new();
    for step in &analysis.steps {
        if step.name.trim().is_empty() {
            return Err(PlanningError("step without a name".into()));
        }
        for dep in &step.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(PlanningError(format!(
                    "step '{}' depends on unknown or later step '{}'",
                    step.name, dep
                )));
            }
        }
        if !seen.insert(step.name.as_str()) {
            return Err(PlanningError(format!("duplicate step name '{}'", step.name)));
        }
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_fenced_plan_with_prose() {
        let raw = r#"Sure! Here is the plan:
```json
{"intent": "find_exercise", "confidence": 0.9,
 "steps": [{"name": "lookup", "tools": ["find_exercise"], "args": {"find_exercise": {"query": "row"}}}]}
```"#;
        let plan = parse_intent(raw, 8).unwrap();
        assert_eq!(plan.intent, "find_exercise");
        assert!(plan.is_actionable());
        assert_eq!(plan.steps[0].args_for("find_exercise"), json!({"query": "row"}));
        assert_eq!(plan.steps[0].args_for("search_exercises"), Value::Null);
    }

    #[test]
    fn test_flat_args_apply_to_single_tool_step() {
        let raw = r#"{"intent": "x", "steps": [{"name": "a", "tools": ["find_exercise"], "args": {"query": "plank"}}]}"#;
        let plan = parse_intent(raw, 8).unwrap();
        assert_eq!(plan.steps[0].args_for("find_exercise"), json!({"query": "plank"}));
    }

    #[test]
    fn test_modification_without_field_needs_clarification() {
        let raw = r#"{"intent": "modify_exercise", "confidence": 0.8,
                      "modification": {"operation": "scale", "factor": 2}}"#;
        let plan = parse_intent(raw, 8).unwrap();
        assert!(plan.needs_field_clarification());
        let m = plan.modification.unwrap();
        assert_eq!(m.amount, 2.0);
        assert_eq!(m.base_args().get("operation"), Some(&json!("scale")));
    }

    #[test]
    fn test_rejects_garbage_and_forward_dependencies() {
        assert!(parse_intent("I think you want a row", 8).is_err());
        assert!(parse_intent("{not json}", 8).is_err());
        let raw = r#"{"intent": "x", "steps": [
            {"name": "a", "dependencies": ["b"]}, {"name": "b"}]}"#;
        assert!(parse_intent(raw, 8).is_err());
        let raw = r#"{"intent": "x", "steps": [{"name": "a"}, {"name": "a"}]}"#;
        assert!(parse_intent(raw, 8).is_err());
    }

    #[test]
    fn test_truncates_and_clamps() {
        let raw = r#"{"intent": "x", "confidence": 7, "steps": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}"#;
        let plan = parse_intent(raw, 2).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.confidence, 1.0);
    }
}
