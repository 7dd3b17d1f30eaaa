//! 核心编排层：错误与恢复、澄清对话、意图计划、会话监管、主控编排

pub mod builder;
pub mod clarification;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod recovery;
pub mod session_supervisor;

pub use builder::{BuildError, Coach, CoachBuilder};
pub use clarification::{ClarificationContext, ClarificationOption, ResolvedCall};
pub use error::{
    CoachError, CompletionError, ErrorKind, PlanningError, StateError, StoreError, ToolError,
    TransientKind,
};
pub use orchestrator::{Orchestrator, ToolCallRecord, TurnResponse};
pub use planner::{IntentAnalysis, Modification, PlannedStep};
pub use recovery::{RecoveryAction, RecoveryEngine, TurnStage};
pub use session_supervisor::{SessionSupervisor, TurnPermit};
