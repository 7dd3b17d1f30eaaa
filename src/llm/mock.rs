//! Mock 补全服务（用于测试与离线运行，无需 API）
//!
//! 按提示词类型（意图分析 / 回复生成）和用户消息中的关键字返回预设内容；
//! 未命中规则时意图返回「普通对话」，回复则复述提示中的步骤结果。

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::prompts::{INTENT_HEADER, REPLY_HEADER, STEP_RESULTS_HEADER, USER_LINE_PREFIX};
use crate::core::CompletionError;
use crate::llm::{CompletionService, CompletionStream};

const DEFAULT_INTENT: &str = r#"{"intent": "general", "confidence": 0.6, "steps": []}"#;

/// 规则驱动的 Mock：intent_rules / reply_rules 按添加顺序匹配，首条命中生效
#[derive(Debug, Default)]
pub struct MockCompletionService {
    intent_rules: Vec<(String, String)>,
    reply_rules: Vec<(String, String)>,
    failure: Option<CompletionError>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用户消息包含 needle（不区分大小写）时，意图分析返回 response
    pub fn on_intent(mut self, needle: &str, response: impl Into<String>) -> Self {
        self.intent_rules
            .push((needle.to_lowercase(), response.into()));
        self
    }

    /// 用户消息包含 needle 时，回复生成返回 response
    pub fn on_reply(mut self, needle: &str, response: impl Into<String>) -> Self {
        self.reply_rules
            .push((needle.to_lowercase(), response.into()));
        self
    }

    /// 所有调用都返回给定错误（模拟服务不可达）
    pub fn failing(mut self, err: CompletionError) -> Self {
        self.failure = Some(err);
        self
    }

    /// 已收到的提示词（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn respond(&self, prompt: &str) -> Result<String, CompletionError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let user_line = user_line(prompt);
        if prompt.starts_with(INTENT_HEADER) {
            let hit = find_rule(&self.intent_rules, &user_line);
            return Ok(hit.unwrap_or_else(|| DEFAULT_INTENT.to_string()));
        }
        if prompt.starts_with(REPLY_HEADER) {
            if let Some(hit) = find_rule(&self.reply_rules, &user_line) {
                return Ok(hit);
            }
            return Ok(summarize_step_results(prompt));
        }
        Ok(format!("Echo from Mock: {}", user_line))
    }
}

fn user_line(prompt: &str) -> String {
    prompt
        .lines()
        .rev()
        .find_map(|l| l.strip_prefix(USER_LINE_PREFIX))
        .unwrap_or("")
        .to_lowercase()
}

fn find_rule(rules: &[(String, String)], user_line: &str) -> Option<String> {
    rules
        .iter()
        .find(|(needle, _)| user_line.contains(needle.as_str()))
        .map(|(_, response)| response.clone())
}

/// 把提示中「步骤结果」段落的条目拼成一句回复
fn summarize_step_results(prompt: &str) -> String {
    let items: Vec<&str> = prompt
        .lines()
        .skip_while(|l| !l.starts_with(STEP_RESULTS_HEADER))
        .skip(1)
        .take_while(|l| l.starts_with("- "))
        .map(|l| l.trim_start_matches("- "))
        .collect();
    if items.is_empty() {
        "Happy to help with your training!".to_string()
    } else {
        format!("Done. {}", items.join(" "))
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.respond(prompt)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream, CompletionError> {
        let content = self.respond(prompt)?;
        let chunks: Vec<Result<String, CompletionError>> = content
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
