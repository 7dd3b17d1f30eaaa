//! 提示词拼装
//!
//! 两类提示：意图分析（要求返回计划 JSON）与回复生成（引用步骤结果）。
//! 首行是类型标记，最后一行固定是用户原话，Mock 补全服务依赖这一布局。

use serde_json::Value;

pub const INTENT_HEADER: &str = "### intent-analysis";
pub const REPLY_HEADER: &str = "### compose-reply";
pub const STEP_RESULTS_HEADER: &str = "Step results:";
pub const USER_LINE_PREFIX: &str = "User message: ";
pub const EXTENSION_SCHEMA_HEADER: &str = "Other tool arguments (args object per tool):";

const INTENT_INSTRUCTIONS: &str = r#"You are the planning module of a fitness coaching assistant.
Classify the user's message and, for actionable requests, propose an ordered plan.
Reply with ONE JSON object and nothing else:
{"intent": "<name>", "confidence": <0..1>, "entities": {...},
 "modification": {"operation": "scale|set|add", "amount": <number>, "field": "sets|reps|both", "exercise": "<name>"},
 "steps": [{"name": "<unique>", "description": "...", "tools": ["<tool>"], "dependencies": ["<earlier step name>"],
            "args": {"<tool>": {...}}}]}
Omit "modification" unless the user wants to change the current workout; omit "field" when the user did not say which.
Use "steps": [] for small talk."#;

const REPLY_INSTRUCTIONS: &str = "You are a friendly, concise fitness coach. Reply to the user in two or three sentences \
using the step results below. Mention concrete exercises, sets and reps. Never mention internal errors; \
if a step failed, say briefly that part could not be done.";

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 意图分析提示：指令、可用工具、参数 schema（内置工具一份，外部工具逐个列出）、会话上下文、用户原话
pub fn intent_prompt(
    context: &str,
    tools: &[(String, String)],
    tool_schema: &str,
    extension_schemas: &[(String, Value)],
    utterance: &str,
) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|(name, desc)| format!("- {name}: {desc}"))
        .collect();
    let extensions = if extension_schemas.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = extension_schemas
            .iter()
            .map(|(name, schema)| format!("- {name}: {schema}"))
            .collect();
        format!("\n\n{EXTENSION_SCHEMA_HEADER}\n{}", lines.join("\n"))
    };
    format!(
        "{INTENT_HEADER}\n{INTENT_INSTRUCTIONS}\n\nAvailable tools:\n{}\n\nTool argument schema:\n{}{}\n\nConversation context:\n{}\n\n{USER_LINE_PREFIX}{}",
        tool_lines.join("\n"),
        tool_schema,
        extensions,
        context,
        single_line(utterance)
    )
}

/// 回复生成提示；step_results 每条渲染为 "- " 开头的一行
pub fn reply_prompt(context: &str, intent: &str, step_results: &[String], utterance: &str) -> String {
    let results: Vec<String> = step_results
        .iter()
        .map(|r| format!("- {}", single_line(r)))
        .collect();
    format!(
        "{REPLY_HEADER}\n{REPLY_INSTRUCTIONS}\n\nConversation context:\n{}\n\nIntent: {}\n{STEP_RESULTS_HEADER}\n{}\n\n{USER_LINE_PREFIX}{}",
        context,
        intent,
        results.join("\n"),
        single_line(utterance)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_line_is_last_and_single_line() {
        let p = intent_prompt("ctx", &[("find_exercise".into(), "find".into())], "{}", &[], "find\nme a row");
        assert!(p.starts_with(INTENT_HEADER));
        assert_eq!(p.lines().last(), Some("User message: find me a row"));
        assert!(p.contains("- find_exercise: find"));
        assert!(!p.contains(EXTENSION_SCHEMA_HEADER));
    }

    #[test]
    fn test_extension_schemas_are_listed_per_tool() {
        let schema = serde_json::json!({"type": "object", "required": ["calories"]});
        let p = intent_prompt(
            "ctx",
            &[("log_meal".into(), "record a meal".into())],
            "{}",
            &[("log_meal".into(), schema.clone())],
            "log my lunch",
        );
        let listed: Vec<&str> = p
            .lines()
            .skip_while(|l| *l != EXTENSION_SCHEMA_HEADER)
            .skip(1)
            .take_while(|l| l.starts_with("- "))
            .collect();
        assert_eq!(listed, vec![format!("- log_meal: {schema}")]);
        assert_eq!(p.lines().last(), Some("User message: log my lunch"));
    }

    #[test]
    fn test_reply_prompt_bullets_follow_header() {
        let p = reply_prompt("ctx", "find_exercise", &["Dumbbell Row (fuzzy)".into()], "row");
        let after: Vec<&str> = p
            .lines()
            .skip_while(|l| *l != STEP_RESULTS_HEADER)
            .skip(1)
            .take_while(|l| l.starts_with("- "))
            .collect();
        assert_eq!(after, vec!["- Dumbbell Row (fuzzy)"]);
    }
}
