//! 会话状态管理器
//!
//! 独占每个会话的 ConversationState：所有读写都经由这里，每次修改后立即写回 SessionStore。
//! 同一会话的写入由上层 SessionSupervisor 串行化（每会话同时只有一个回合在处理）。

use std::sync::Arc;

use crate::core::clarification::ClarificationContext;
use crate::core::StateError;
use crate::memory::token_budget::{assemble, truncate_chars, ContextBudget};
use crate::memory::{
    ConversationState, DialogueState, Message, ProfileProvider, Role, SessionStore, StepPatch,
    StepSpec, TaskContext,
};

pub struct ConversationStateManager {
    store: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileProvider>,
    budget: ContextBudget,
}

impl ConversationStateManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileProvider>,
        budget: ContextBudget,
    ) -> Self {
        Self {
            store,
            profiles,
            budget,
        }
    }

    /// 载入已有会话；不存在时新建并以画像摘要作为首条 system 消息。对同一会话幂等。
    pub async fn initialize_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<ConversationState, StateError> {
        if let Some(existing) = self.store.load(session_id).await? {
            return Ok(existing);
        }
        let mut state = ConversationState::new(session_id, user_id);
        if let Some(profile) = self.profiles.fetch(user_id).await {
            state
                .messages
                .push(Message::system(format!("Profile: {}", profile.summary())));
            state.user_profile = Some(profile);
        }
        self.store.save(&state).await?;
        tracing::debug!(session_id, user_id, "conversation state created");
        Ok(state)
    }

    pub async fn get_state(&self, session_id: &str) -> Result<ConversationState, StateError> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()))
    }

    /// load → 修改 → touch → save
    async fn mutate<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ConversationState) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let mut state = self.get_state(session_id).await?;
        let out = f(&mut state)?;
        state.touch();
        self.store.save(&state).await?;
        Ok(out)
    }

    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<(), StateError> {
        self.mutate(session_id, |state| {
            state.messages.push(message);
            Ok(())
        })
        .await
    }

    /// 创建任务；已有非终态任务时返回 InvalidState
    pub async fn start_task(
        &self,
        session_id: &str,
        task_type: &str,
        steps: Vec<StepSpec>,
    ) -> Result<String, StateError> {
        self.mutate(session_id, |state| {
            if let Some(running) = state.active_task.as_ref().filter(|t| !t.is_terminal()) {
                return Err(StateError::InvalidState(format!(
                    "task {} is still active",
                    running.task_id
                )));
            }
            let task = TaskContext::new(task_type, steps);
            let task_id = task.task_id.clone();
            state.active_task = Some(task);
            Ok(task_id)
        })
        .await
    }

    /// 更新单个步骤；所有步骤终态后任务自动终止。返回更新后的任务快照。
    pub async fn update_task_step(
        &self,
        session_id: &str,
        step_id: &str,
        patch: StepPatch,
    ) -> Result<TaskContext, StateError> {
        self.mutate(session_id, |state| {
            let task = state
                .active_task
                .as_mut()
                .ok_or_else(|| StateError::InvalidState("no active task".to_string()))?;
            if !task.apply(step_id, patch) {
                return Err(StateError::StepNotFound(step_id.to_string()));
            }
            Ok(task.clone())
        })
        .await
    }

    /// 强制结束当前任务（未完成步骤记为失败）
    pub async fn finish_task(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<Option<TaskContext>, StateError> {
        self.mutate(session_id, |state| {
            Ok(state.active_task.as_mut().map(|task| {
                task.abandon(reason);
                task.clone()
            }))
        })
        .await
    }

    pub async fn active_task(&self, session_id: &str) -> Result<Option<TaskContext>, StateError> {
        Ok(self.get_state(session_id).await?.active_task)
    }

    pub async fn dialogue_state(&self, session_id: &str) -> Result<DialogueState, StateError> {
        Ok(self.get_state(session_id).await?.dialogue)
    }

    /// 进入等待澄清；已有待澄清上下文时直接替换（不叠加）
    pub async fn set_clarification(
        &self,
        session_id: &str,
        context: ClarificationContext,
    ) -> Result<(), StateError> {
        self.mutate(session_id, |state| {
            state.dialogue = DialogueState::AwaitingClarification(context);
            Ok(())
        })
        .await
    }

    /// 回到 Idle，返回被清除的上下文
    pub async fn clear_clarification(
        &self,
        session_id: &str,
    ) -> Result<Option<ClarificationContext>, StateError> {
        self.mutate(session_id, |state| {
            Ok(match std::mem::take(&mut state.dialogue) {
                DialogueState::AwaitingClarification(ctx) => Some(ctx),
                DialogueState::Idle => None,
            })
        })
        .await
    }

    pub async fn recent_messages(
        &self,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Message>, StateError> {
        let state = self.get_state(session_id).await?;
        let start = state.messages.len().saturating_sub(n);
        Ok(state.messages[start..].to_vec())
    }

    /// 显式清理会话（唯一的删除入口）
    pub async fn cleanup(&self, session_id: &str) -> Result<(), StateError> {
        self.store.delete(session_id).await?;
        Ok(())
    }

    /// 供补全服务使用的上下文片段：画像、当前任务、待澄清问题、最近 N 条消息，总长受预算约束
    pub async fn get_context_for_ai(&self, session_id: &str) -> Result<String, StateError> {
        let state = self.get_state(session_id).await?;
        Ok(render_context(&state, &self.budget))
    }
}

fn render_context(state: &ConversationState, budget: &ContextBudget) -> String {
    let mut sections = Vec::new();

    if let Some(profile) = &state.user_profile {
        sections.push(format!("## User profile\n{}", profile.summary()));
    }

    if let Some(task) = &state.active_task {
        let mut s = format!("## Current task\n{}", task.status_line());
        for step in &task.steps {
            s.push_str(&format!("\n- [{:?}] {}", step.status, step.name));
        }
        sections.push(s);
    }

    if let Some(pending) = state.dialogue.pending() {
        sections.push(format!(
            "## Pending clarification\n{}",
            truncate_chars(&pending.clarification_question, budget.max_message_chars)
        ));
    }

    let conversational: Vec<&Message> = state
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let start = conversational.len().saturating_sub(budget.window_messages);
    if start < conversational.len() {
        let mut s = String::from("## Recent conversation");
        for m in &conversational[start..] {
            s.push_str(&format!(
                "\n{}: {}",
                m.role.as_str(),
                truncate_chars(&m.content.replace('\n', " "), budget.max_message_chars)
            ));
        }
        sections.push(s);
    }

    assemble(&sections, budget.max_chars)
}
