//! modify_workout：缩放、设定或增减当前计划中一个或全部动作的组数/次数

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::matcher::normalize::normalize;
use crate::tools::params::{ModField, ModOp, ModifyWorkoutParams, MODIFY_WORKOUT};
use crate::tools::{Tool, ToolContext, ToolParams, WorkoutBook, WorkoutExercise};

/// 组数/次数的合理上限
const MAX_VOLUME: u32 = 1000;

pub struct ModifyWorkoutTool {
    book: Arc<WorkoutBook>,
}

impl ModifyWorkoutTool {
    pub fn new(book: Arc<WorkoutBook>) -> Self {
        Self { book }
    }
}

fn apply(value: u32, op: ModOp, amount: f64) -> u32 {
    let next = match op {
        ModOp::Scale => value as f64 * amount,
        ModOp::Set => amount,
        ModOp::Add => value as f64 + amount,
    };
    (next.round().max(1.0) as u32).min(MAX_VOLUME)
}

fn modify(exercise: &mut WorkoutExercise, p: &ModifyWorkoutParams) {
    if matches!(p.field, ModField::Sets | ModField::Both) {
        exercise.sets = apply(exercise.sets, p.operation, p.amount);
    }
    if matches!(p.field, ModField::Reps | ModField::Both) {
        exercise.reps = apply(exercise.reps, p.operation, p.amount);
    }
}

fn targets(exercise: &WorkoutExercise, wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(w) => {
            let w = normalize(w);
            let name = normalize(&exercise.name);
            exercise.exercise_id == w || name == w || name.contains(&w)
        }
    }
}

#[async_trait]
impl Tool for ModifyWorkoutTool {
    fn name(&self) -> &str {
        MODIFY_WORKOUT
    }

    fn description(&self) -> &str {
        "Scale, set or adjust sets and/or reps of one or all exercises in the active workout"
    }

    fn validate(&self, params: &ToolParams, _ctx: &ToolContext) -> Result<(), ToolError> {
        let ToolParams::ModifyWorkout(p) = params else {
            return Err(ToolError::validation("modify_workout received foreign params"));
        };
        let ok = match p.operation {
            ModOp::Scale | ModOp::Set => p.amount.is_finite() && p.amount > 0.0,
            ModOp::Add => p.amount.is_finite() && p.amount != 0.0,
        };
        if !ok {
            return Err(ToolError::validation(format!(
                "invalid amount {} for {:?}",
                p.amount, p.operation
            )));
        }
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ToolParams::ModifyWorkout(p) = params else {
            return Err(ToolError::validation("modify_workout received foreign params"));
        };
        let wanted = p.exercise.as_deref().filter(|e| !e.trim().is_empty());
        let (workout, changed) = self
            .book
            .update_active(&ctx.session_id, |w| {
                let mut changed = Vec::new();
                for exercise in w.exercises.iter_mut().filter(|e| targets(e, wanted)) {
                    modify(exercise, p);
                    changed.push(format!("{} {}x{}", exercise.name, exercise.sets, exercise.reps));
                }
                changed
            })
            .await
            .ok_or_else(|| ToolError::validation("there is no active workout to modify"))?;

        if changed.is_empty() {
            return Err(ToolError::validation(format!(
                "'{}' is not in the current workout",
                wanted.unwrap_or_default()
            )));
        }
        Ok(json!({
            "workout": workout,
            "field": p.field,
            "changed": changed,
            "message": format!("Updated {}: {}", p.field.as_str(), changed.join(", ")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Workout;

    async fn book_with_row() -> Arc<WorkoutBook> {
        let book = Arc::new(WorkoutBook::new());
        let exercises = vec![
            WorkoutExercise {
                exercise_id: "dumbbell-row".into(),
                name: "Dumbbell Row".into(),
                sets: 3,
                reps: 10,
            },
            WorkoutExercise {
                exercise_id: "plank".into(),
                name: "Plank".into(),
                sets: 3,
                reps: 30,
            },
        ];
        book.set_active("s", Workout::new("Pull day", exercises)).await;
        book
    }

    fn params(args: Value) -> ToolParams {
        ToolParams::parse(MODIFY_WORKOUT, args).unwrap()
    }

    #[tokio::test]
    async fn test_doubles_reps_of_named_exercise_only() {
        let book = book_with_row().await;
        let tool = ModifyWorkoutTool::new(book.clone());
        let ctx = ToolContext::new("s", "u");
        let out = tool
            .execute(
                &params(json!({"exercise": "dumbbell row", "field": "reps", "operation": "scale", "amount": 2})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["message"], "Updated reps: Dumbbell Row 3x20");
        let active = book.active("s").await.unwrap();
        assert_eq!(active.describe(), "Dumbbell Row 3x20, Plank 3x30");
    }

    #[tokio::test]
    async fn test_both_fields_for_all_exercises() {
        let book = book_with_row().await;
        let tool = ModifyWorkoutTool::new(book.clone());
        let ctx = ToolContext::new("s", "u");
        tool.execute(&params(json!({"field": "both", "operation": "add", "amount": -1})), &ctx)
            .await
            .unwrap();
        assert_eq!(book.active("s").await.unwrap().describe(), "Dumbbell Row 2x9, Plank 2x29");
    }

    #[tokio::test]
    async fn test_missing_workout_and_bad_amount_are_rejected() {
        let tool = ModifyWorkoutTool::new(Arc::new(WorkoutBook::new()));
        let p = params(json!({"field": "sets", "operation": "scale", "amount": 2}));
        let err = tool.execute(&p, &ToolContext::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));

        let p = params(json!({"field": "sets", "operation": "scale", "amount": 0}));
        assert!(tool.validate(&p, &ToolContext::default()).is_err());
    }
}
