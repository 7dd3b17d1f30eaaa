//! 澄清对话
//!
//! 修改请求在构造上存在歧义时（例如 "double it" 没说是组数还是次数），编排器不执行计划，
//! 而是生成 ClarificationContext 并进入等待澄清状态。下一轮用户输入先按选项标签匹配，
//! 再按序号匹配（"2"、"second"、"option 2"）；都不命中则视为 mismatch，重复原问题。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::tools::{ModField, ModOp};

/// 重复提问时的前缀
pub const MISMATCH_NOTICE: &str = "Sorry, I didn't catch that. ";

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn words(text: &str) -> Vec<String> {
    let re = WORD_RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub label: String,
    /// 选中后合并进工具参数的补丁
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationContext {
    pub original_intent_name: String,
    pub clarification_question: String,
    pub options: Vec<ClarificationOption>,
    /// {"tool": 工具名, "args": 基础参数}
    #[serde(default)]
    pub related_data: Value,
}

/// 选项解析后的工具调用
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCall {
    pub option: ClarificationOption,
    pub tool: String,
    pub args: Value,
}

fn operation_phrase(operation: ModOp, amount: f64) -> (String, String) {
    let n = format_amount(amount);
    match operation {
        ModOp::Scale if amount == 2.0 => ("double".into(), String::new()),
        ModOp::Scale if amount == 3.0 => ("triple".into(), String::new()),
        ModOp::Scale if amount == 0.5 => ("halve".into(), String::new()),
        ModOp::Scale => ("scale".into(), format!(" by {n}")),
        ModOp::Set => ("set".into(), format!(" to {n}")),
        ModOp::Add if amount < 0.0 => ("reduce".into(), format!(" by {}", format_amount(-amount))),
        ModOp::Add => ("increase".into(), format!(" by {n}")),
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{amount}")
    }
}

impl ClarificationContext {
    /// 组数/次数未指明的修改：选项固定为 sets / reps / both
    pub fn for_unspecified_field(
        intent: &str,
        tool: &str,
        base_args: Map<String, Value>,
        operation: ModOp,
        amount: f64,
    ) -> Self {
        let (verb, tail) = operation_phrase(operation, amount);
        let options = [ModField::Sets, ModField::Reps, ModField::Both]
            .into_iter()
            .map(|field| ClarificationOption {
                label: field.as_str().to_string(),
                value: json!({ "field": field }),
            })
            .collect();
        Self {
            original_intent_name: intent.to_string(),
            clarification_question: format!(
                "Do you want me to {verb} the sets, the reps, or both{tail}?"
            ),
            options,
            related_data: json!({ "tool": tool, "args": Value::Object(base_args) }),
        }
    }

    /// 问题 + 编号选项
    pub fn prompt(&self) -> String {
        let listed: Vec<String> = self
            .options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}", i + 1, o.label))
            .collect();
        format!("{} ({})", self.clarification_question, listed.join(", "))
    }

    pub fn mismatch_prompt(&self) -> String {
        format!("{MISMATCH_NOTICE}{}", self.prompt())
    }

    /// 先按标签整词匹配（恰好一个选项命中才算），再按序号匹配
    pub fn resolve(&self, utterance: &str) -> Option<&ClarificationOption> {
        let tokens = words(utterance);
        if tokens.is_empty() {
            return None;
        }

        let by_label: Vec<&ClarificationOption> = self
            .options
            .iter()
            .filter(|o| {
                let label = words(&o.label);
                !label.is_empty() && contains_run(&tokens, &label)
            })
            .collect();
        if by_label.len() == 1 {
            return Some(by_label[0]);
        }
        if by_label.len() > 1 {
            return None;
        }

        let index = ordinal(&tokens)?;
        self.options.get(index.checked_sub(1)?)
    }

    /// 选中项补丁合并进基础参数
    pub fn resolved_call(&self, option: &ClarificationOption) -> Option<ResolvedCall> {
        let tool = self.related_data.get("tool")?.as_str()?.to_string();
        let mut args = self
            .related_data
            .get("args")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(patch) = option.value.as_object() {
            for (k, v) in patch {
                args.insert(k.clone(), v.clone());
            }
        }
        Some(ResolvedCall {
            option: option.clone(),
            tool,
            args: Value::Object(args),
        })
    }
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

const FILLERS: &[&str] = &["option", "number", "no", "choice", "the", "please", "pick", "go", "with"];

/// 只有整句基本就是一个序号时才识别："2"、"#2"、"2nd"、"second"、"option two"、"the second one"
fn ordinal(tokens: &[String]) -> Option<usize> {
    if tokens.len() > 4 {
        return None;
    }
    let mut rest: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !FILLERS.contains(t))
        .collect();
    if rest.len() == 2 && rest[1] == "one" {
        rest.pop();
    }
    let [token] = rest.as_slice() else {
        return None;
    };
    let token = *token;
    let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    if !digits.is_empty() && token[digits.len()..].len() <= 2 {
        if let Ok(n) = digits.parse::<usize>() {
            return Some(n);
        }
    }
    let n = match token {
        "one" | "first" => 1,
        "two" | "second" => 2,
        "three" | "third" => 3,
        "four" | "fourth" => 4,
        "five" | "fifth" => 5,
        _ => return None,
    };
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_it() -> ClarificationContext {
        let mut base = Map::new();
        base.insert("operation".into(), json!("scale"));
        base.insert("amount".into(), json!(2.0));
        ClarificationContext::for_unspecified_field("modify_exercise", "modify_workout", base, ModOp::Scale, 2.0)
    }

    #[test]
    fn test_question_lists_three_options() {
        let ctx = double_it();
        assert_eq!(
            ctx.clarification_question,
            "Do you want me to double the sets, the reps, or both?"
        );
        let labels: Vec<_> = ctx.options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["sets", "reps", "both"]);
        assert!(ctx.prompt().ends_with("(1. sets, 2. reps, 3. both)"));
        assert!(ctx.mismatch_prompt().starts_with(MISMATCH_NOTICE));
    }

    #[test]
    fn test_ordinals_select_by_position() {
        let ctx = double_it();
        for answer in ["2", "#2", "2nd", "second", "option 2", "the second one", "Two."] {
            assert_eq!(ctx.resolve(answer).map(|o| o.label.as_str()), Some("reps"), "{answer}");
        }
        assert!(ctx.resolve("7").is_none());
        assert!(ctx.resolve("0").is_none());
    }

    #[test]
    fn test_labels_match_whole_words_only_when_unambiguous() {
        let ctx = double_it();
        assert_eq!(ctx.resolve("the reps please").unwrap().label, "reps");
        assert_eq!(ctx.resolve("Both!").unwrap().label, "both");
        assert!(ctx.resolve("sets and reps").is_none());
        assert!(ctx.resolve("represent").is_none());
    }

    #[test]
    fn test_unrelated_input_does_not_resolve() {
        let ctx = double_it();
        assert!(ctx.resolve("what's the weather like").is_none());
        assert!(ctx.resolve("show me a hamstring stretch").is_none());
        assert!(ctx.resolve("").is_none());
    }

    #[test]
    fn test_resolved_call_merges_option_patch() {
        let ctx = double_it();
        let option = ctx.resolve("2").unwrap().clone();
        let call = ctx.resolved_call(&option).unwrap();
        assert_eq!(call.tool, "modify_workout");
        assert_eq!(
            call.args,
            json!({"operation": "scale", "amount": 2.0, "field": "reps"})
        );
    }
}
