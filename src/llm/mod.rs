//! LLM 层：补全服务抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::MockCompletionService;
pub use openai::{OpenAiCompletion, TokenUsage};
pub use traits::{
    collect_stream, complete_streaming, CompletionService, CompletionStream, StreamedText,
};

/// 按 [llm].provider 创建补全服务；openai 以外的取值一律退回 Mock
pub fn create_completion_from_config(cfg: &AppConfig) -> Arc<dyn CompletionService> {
    match cfg.llm.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&cfg.llm.api_key_env).ok();
            tracing::info!(model = %cfg.llm.model, "using OpenAI-compatible completion service");
            Arc::new(OpenAiCompletion::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                api_key,
            ))
        }
        other => {
            if other != "mock" {
                tracing::warn!(provider = %other, "unknown llm provider, falling back to mock");
            }
            Arc::new(MockCompletionService::new())
        }
    }
}
