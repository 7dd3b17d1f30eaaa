//! save_workout：保存当前训练计划

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::params::SAVE_WORKOUT;
use crate::tools::{Tool, ToolContext, ToolParams, WorkoutBook};

pub struct SaveWorkoutTool {
    book: Arc<WorkoutBook>,
}

impl SaveWorkoutTool {
    pub fn new(book: Arc<WorkoutBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl Tool for SaveWorkoutTool {
    fn name(&self) -> &str {
        SAVE_WORKOUT
    }

    fn description(&self) -> &str {
        "Save the session's active workout, optionally under a new name"
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ToolParams::SaveWorkout(p) = params else {
            return Err(ToolError::validation("save_workout received foreign params"));
        };
        let saved = self
            .book
            .save_active(&ctx.session_id, p.name.as_deref())
            .await
            .ok_or_else(|| ToolError::validation("there is no active workout to save"))?;
        Ok(json!({
            "workout": saved,
            "message": format!("Saved {}: {}", saved.name, saved.describe()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Workout, WorkoutExercise};

    #[tokio::test]
    async fn test_saves_active_workout() {
        let book = Arc::new(WorkoutBook::new());
        let tool = SaveWorkoutTool::new(book.clone());
        let ctx = ToolContext::new("s", "u");
        let params = ToolParams::parse(SAVE_WORKOUT, Value::Null).unwrap();
        assert!(tool.execute(&params, &ctx).await.is_err());

        let squat = WorkoutExercise {
            exercise_id: "goblet-squat".into(),
            name: "Goblet Squat".into(),
            sets: 3,
            reps: 12,
        };
        book.set_active("s", Workout::new("Legs", vec![squat])).await;
        let out = tool.execute(&params, &ctx).await.unwrap();
        assert_eq!(out["message"], "Saved Legs: Goblet Squat 3x12");
        assert_eq!(book.saved("s").await.len(), 1);
    }
}
