//! 会话状态（工作记忆）
//!
//! 每个会话一份 ConversationState：消息历史、当前任务、缓存的用户画像、澄清对话状态。
//! 澄清上下文只存在于 AwaitingClarification 变体里，因此「上下文非空 ⇔ 等待澄清」由类型保证。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::clarification::ClarificationContext;
use crate::memory::{Message, TaskContext, UserProfile};

/// 澄清对话状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "context", rename_all = "snake_case")]
pub enum DialogueState {
    #[default]
    Idle,
    AwaitingClarification(ClarificationContext),
}

impl DialogueState {
    pub fn pending(&self) -> Option<&ClarificationContext> {
        match self {
            DialogueState::Idle => None,
            DialogueState::AwaitingClarification(ctx) => Some(ctx),
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, DialogueState::AwaitingClarification(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub active_task: Option<TaskContext>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub dialogue: DialogueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            active_task: None,
            user_profile: None,
            dialogue: DialogueState::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 是否存在非终态任务
    pub fn has_running_task(&self) -> bool {
        self.active_task
            .as_ref()
            .map(|t| !t.is_terminal())
            .unwrap_or(false)
    }
}
