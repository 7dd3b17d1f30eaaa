//! OpenAI 兼容 API 补全服务
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；提示词作为单条 user 消息发送。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::core::CompletionError;
use crate::llm::{CompletionService, CompletionStream};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt_tokens, completion_tokens)
    pub fn get(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容补全服务：持有 Client 与 model 名
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiCompletion {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<String>) -> Self {
        let api_key = api_key.unwrap_or_else(|| "sk-placeholder".to_string());
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn request(&self, prompt: &str, stream: bool) -> Result<CreateChatCompletionRequest, CompletionError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(map_openai_error)?;
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .stream(stream)
            .build()
            .map_err(map_openai_error)
    }
}

/// 将 SDK 错误归类为 CompletionError（超时、限流与网络错误单独区分）
fn map_openai_error(err: OpenAIError) -> CompletionError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        CompletionError::Timeout
    } else if lower.contains("rate limit") || lower.contains("rate_limit") {
        CompletionError::RateLimited
    } else if lower.contains("connect") || lower.contains("dns") {
        CompletionError::Unavailable(text)
    } else if lower.contains("deserialize") {
        CompletionError::InvalidResponse(text)
    } else {
        CompletionError::Api(text)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = self.request(prompt, false)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| CompletionError::InvalidResponse("empty choices".to_string()))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream, CompletionError> {
        let request = self.request(prompt, true)?;
        let upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        let chunks = upstream.map(|item| {
            item.map(|resp| {
                resp.choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .unwrap_or_default()
            })
            .map_err(map_openai_error)
        });
        Ok(Box::pin(chunks))
    }
}
