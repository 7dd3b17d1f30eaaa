//! create_workout：用显式动作名或前序步骤找到的动作新建当前训练计划

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::matcher::{ExerciseMatcher, ExerciseRecord, MatchOptions};
use crate::tools::params::CREATE_WORKOUT;
use crate::tools::{Tool, ToolContext, ToolParams, Workout, WorkoutBook, WorkoutExercise};

const DEFAULT_WORKOUT_NAME: &str = "Custom workout";

pub struct CreateWorkoutTool {
    matcher: Arc<ExerciseMatcher>,
    book: Arc<WorkoutBook>,
}

impl CreateWorkoutTool {
    pub fn new(matcher: Arc<ExerciseMatcher>, book: Arc<WorkoutBook>) -> Self {
        Self { matcher, book }
    }
}

/// 从前序步骤输出里收集动作：单个匹配取 exercise，多结果取 matches[*].exercise
fn exercises_from_prior(ctx: &ToolContext) -> Vec<ExerciseRecord> {
    let mut out: Vec<ExerciseRecord> = Vec::new();
    let mut push = |v: &Value| {
        if let Ok(record) = serde_json::from_value::<ExerciseRecord>(v.clone()) {
            if !out.iter().any(|r| r.id == record.id) {
                out.push(record);
            }
        }
    };
    for (_, output) in &ctx.prior_outputs {
        if let Some(exercise) = output.get("exercise") {
            push(exercise);
        }
        if let Some(matches) = output.get("matches").and_then(Value::as_array) {
            for m in matches {
                if let Some(exercise) = m.get("exercise") {
                    push(exercise);
                }
            }
        }
    }
    out
}

#[async_trait]
impl Tool for CreateWorkoutTool {
    fn name(&self) -> &str {
        CREATE_WORKOUT
    }

    fn description(&self) -> &str {
        "Create the session's active workout from exercise names or previously found exercises"
    }

    fn validate(&self, params: &ToolParams, _ctx: &ToolContext) -> Result<(), ToolError> {
        let ToolParams::CreateWorkout(p) = params else {
            return Err(ToolError::validation("create_workout received foreign params"));
        };
        if p.sets == 0 || p.reps == 0 {
            return Err(ToolError::validation("sets and reps must be positive"));
        }
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ToolParams::CreateWorkout(p) = params else {
            return Err(ToolError::validation("create_workout received foreign params"));
        };

        let mut unresolved = Vec::new();
        let records: Vec<ExerciseRecord> = if p.exercises.is_empty() {
            exercises_from_prior(ctx)
        } else {
            p.exercises
                .iter()
                .filter_map(|name| {
                    let found = self.matcher.find_best(name, &MatchOptions::default());
                    if found.is_none() {
                        unresolved.push(name.clone());
                    }
                    found.map(|m| m.exercise)
                })
                .collect()
        };
        if records.is_empty() {
            return Err(ToolError::validation("no exercises to put in the workout"));
        }

        let exercises = records
            .into_iter()
            .map(|r| WorkoutExercise {
                exercise_id: r.id,
                name: r.name,
                sets: p.sets,
                reps: p.reps,
            })
            .collect();
        let name = p
            .name
            .clone()
            .or_else(|| ctx.entity_str("workout_name").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_WORKOUT_NAME.to_string());
        let workout = Workout::new(name, exercises);
        self.book.set_active(&ctx.session_id, workout.clone()).await;

        Ok(json!({
            "workout": workout,
            "unresolved": unresolved,
            "message": format!("Created {}: {}", workout.name, workout.describe()),
        }))
    }
}
