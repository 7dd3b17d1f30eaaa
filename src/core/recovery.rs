//! 错误恢复引擎
//!
//! 把回合内的 CoachError 映射为 RecoveryAction：回复生成阶段的补全失败退化为模板回复，
//! 取消保留已生成的部分，其余不可恢复错误给出固定的致歉话术。内部错误从不原样展示给用户。

use crate::core::{CompletionError, CoachError};

/// 不可恢复回合的置信度
pub const UNRECOVERABLE_CONFIDENCE: f64 = 0.3;

const APOLOGY: &str =
    "Sorry, I'm having trouble right now and couldn't finish that. Please try again in a moment.";
const BUSY_APOLOGY: &str =
    "Sorry, I'm getting a lot of requests right now. Please try again in a minute.";

/// 出错时回合所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    /// 计划产生之前（意图分析、状态读写）
    Planning,
    /// 步骤已执行，正在生成回复
    Reply,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 回合失败：返回致歉话术，置信度 0.3，不报告工具调用
    Apologize(String),
    /// 用步骤结果拼模板回复
    TemplateReply,
    /// 已取消：把已生成的部分作为助手消息
    KeepPartial,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &CoachError, stage: TurnStage) -> RecoveryAction {
        tracing::warn!(error = %err, ?stage, "turn recovery");
        match (err, stage) {
            (CoachError::Cancelled, _) => RecoveryAction::KeepPartial,
            (CoachError::Completion(_), TurnStage::Reply) => RecoveryAction::TemplateReply,
            (CoachError::Planning(_), TurnStage::Reply) => RecoveryAction::TemplateReply,
            (CoachError::Completion(CompletionError::RateLimited), TurnStage::Planning) => {
                RecoveryAction::Apologize(BUSY_APOLOGY.to_string())
            }
            _ => RecoveryAction::Apologize(APOLOGY.to_string()),
        }
    }

    /// 补全服务不可用时的模板回复
    pub fn template_reply(&self, step_results: &[String]) -> String {
        if step_results.is_empty() {
            return "All set.".to_string();
        }
        format!("Here's what I did: {}", step_results.join("; "))
    }
}
