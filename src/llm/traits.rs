//! 补全服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 CompletionService：complete（非流式）、complete_stream（流式文本块）。
//! 核心只消费文本，不关心背后是哪个模型。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::CompletionError;

/// 流式补全返回的文本块流
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// 补全服务 trait
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// 非流式完成
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// 流式完成；默认把非流式结果包装成单个文本块
    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream, CompletionError> {
        let content = self.complete(prompt).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}

/// 流式收集结果：取消或中途出错时 text 为已经回调出去的部分内容
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedText {
    pub text: String,
    pub cancelled: bool,
    /// 已输出部分文本之后流才出错
    pub error: Option<CompletionError>,
}

impl StreamedText {
    fn finished(text: String, cancelled: bool) -> Self {
        Self {
            text,
            cancelled,
            error: None,
        }
    }
}

/// 消费文本块流：每块回调 on_chunk，块与块之间检查取消令牌。
///
/// 还没输出任何文本就出错时返回 Err；已有输出时返回 Ok，错误放在 error 字段，
/// 调用方据此保证展示与记录一致。
pub async fn collect_stream(
    mut chunks: CompletionStream,
    on_chunk: &mut (dyn FnMut(&str) + Send),
    cancel: &CancellationToken,
) -> Result<StreamedText, CompletionError> {
    let mut text = String::new();
    loop {
        if cancel.is_cancelled() {
            return Ok(StreamedText::finished(text, true));
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(StreamedText::finished(text, true));
            }
            item = chunks.next() => item,
        };
        match next {
            Some(Ok(chunk)) => {
                on_chunk(&chunk);
                text.push_str(&chunk);
            }
            Some(Err(e)) if text.is_empty() => return Err(e),
            Some(Err(e)) => {
                tracing::debug!(error = %e, emitted = text.len(), "completion stream broke off");
                return Ok(StreamedText {
                    text,
                    cancelled: false,
                    error: Some(e),
                });
            }
            None => break,
        }
    }
    Ok(StreamedText::finished(text, false))
}

/// completeStreaming(prompt, onChunk, cancel)：发起流式补全并收集
pub async fn complete_streaming(
    service: &dyn CompletionService,
    prompt: &str,
    on_chunk: &mut (dyn FnMut(&str) + Send),
    cancel: &CancellationToken,
) -> Result<StreamedText, CompletionError> {
    let chunks = service.complete_stream(prompt).await?;
    collect_stream(chunks, on_chunk, cancel).await
}
