//! 记忆层：对话消息、任务工作记忆、会话状态、用户画像、持久化与上下文预算

pub mod conversation;
pub mod manager;
pub mod persistence;
pub mod profile;
pub mod state;
pub mod token_budget;
pub mod working;

pub use conversation::{Message, Role, ToolPayload};
pub use manager::ConversationStateManager;
pub use persistence::{InMemorySessionStore, SessionStore, SqliteSessionStore};
pub use profile::{ProfileProvider, StaticProfileProvider, UserProfile};
pub use state::{ConversationState, DialogueState};
pub use token_budget::ContextBudget;
pub use working::{StepPatch, StepSpec, StepStatus, TaskContext, TaskStep};
