//! 工具层：注册表、执行器（超时 / 重试 / 熔断 / 兜底）与健身领域工具

pub mod circuit;
pub mod context;
pub mod create_workout;
pub mod executor;
pub mod find_exercise;
pub mod modify_workout;
pub mod params;
pub mod registry;
pub mod result;
pub mod retry;
pub mod save_workout;
pub mod schema;
pub mod search_exercises;
pub mod workout_book;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState,
    Transition,
};
pub use context::ToolContext;
pub use create_workout::CreateWorkoutTool;
pub use executor::ToolExecutor;
pub use find_exercise::FindExerciseTool;
pub use modify_workout::ModifyWorkoutTool;
pub use params::{ModField, ModOp, ToolParams};
pub use registry::{Tool, ToolRegistry};
pub use result::{ToolMetadata, ToolResult};
pub use retry::RetryConfig;
pub use save_workout::SaveWorkoutTool;
pub use schema::tool_call_schema_json;
pub use search_exercises::SearchExercisesTool;
pub use workout_book::{Workout, WorkoutBook, WorkoutExercise};
