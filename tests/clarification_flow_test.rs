//! 澄清对话集成测试：未指明组数/次数的修改 → 追问 → 按序号、标签或新意图继续

use std::sync::Arc;

use fitcoach::config::AppConfig;
use fitcoach::core::{Coach, CoachBuilder};
use fitcoach::llm::MockCompletionService;
use fitcoach::memory::{DialogueState, StepStatus};
use fitcoach::observability::MemorySink;
use fitcoach::tools::{Workout, WorkoutExercise};

const DOUBLE_IT: &str = r#"{
    "intent": "modify_exercise",
    "confidence": 0.9,
    "entities": {"exercise": "Dumbbell Row"},
    "modification": {"operation": "scale", "amount": 2, "exercise": "Dumbbell Row"}
}"#;

const PLANK_WORKOUT: &str = r#"```json
{
    "intent": "create_workout",
    "confidence": 0.85,
    "steps": [
        {"name": "build", "tools": ["create_workout"],
         "args": {"create_workout": {"name": "Core day", "exercises": ["plank"], "sets": 3, "reps": 45}}}
    ]
}
```"#;

const PROMPT: &str =
    "Do you want me to double the sets, the reps, or both? (1. sets, 2. reps, 3. both)";

async fn coach() -> (Coach, Arc<MemorySink>) {
    let mock = MockCompletionService::new()
        .on_intent("double it", DOUBLE_IT)
        .on_intent("core workout", PLANK_WORKOUT);
    let sink = Arc::new(MemorySink::new());
    let coach = CoachBuilder::new(AppConfig::default())
        .with_completion(Arc::new(mock))
        .with_events(sink.clone())
        .build()
        .unwrap();
    coach
        .book
        .set_active(
            "s-1",
            Workout::new(
                "Pull day",
                vec![WorkoutExercise {
                    exercise_id: "dumbbell-row".into(),
                    name: "Dumbbell Row".into(),
                    sets: 3,
                    reps: 10,
                }],
            ),
        )
        .await;
    (coach, sink)
}

async fn row_volume(coach: &Coach) -> (u32, u32) {
    let workout = coach.book.active("s-1").await.unwrap();
    (workout.exercises[0].sets, workout.exercises[0].reps)
}

#[tokio::test]
async fn test_ambiguous_modification_asks_then_applies_ordinal_answer() {
    let (coach, sink) = coach().await;

    let asked = coach.orchestrator.handle_turn("s-1", "u-1", "Double it").await;
    assert!(asked.awaiting_clarification());
    assert_eq!(asked.message, PROMPT);
    assert!(asked.tool_calls.is_empty());
    assert_eq!(asked.dialogue.pending().unwrap().options.len(), 3);
    assert_eq!(row_volume(&coach).await, (3, 10));

    let done = coach.orchestrator.handle_turn("s-1", "u-1", "2").await;
    assert_eq!(done.dialogue, DialogueState::Idle);
    assert_eq!(done.intent, "modify_exercise");
    assert_eq!(done.tool_calls.len(), 1);
    assert_eq!(done.tool_calls[0].tool, "modify_workout");
    assert!(done.tool_calls[0].success);
    assert_eq!(done.message, "Updated reps: Dumbbell Row 3x20");
    assert_eq!(row_volume(&coach).await, (3, 20));

    assert_eq!(sink.named("clarification_requested").len(), 1);
    assert_eq!(sink.named("clarification_resolved").len(), 1);

    let task = coach.state.active_task("s-1").await.unwrap().unwrap();
    assert!(task.is_terminal());
    assert_eq!(task.steps[0].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_unrelated_answer_keeps_question_pending() {
    let (coach, sink) = coach().await;
    coach.orchestrator.handle_turn("s-1", "u-1", "Double it").await;

    let missed = coach
        .orchestrator
        .handle_turn("s-1", "u-1", "what's the weather like")
        .await;
    assert!(missed.awaiting_clarification());
    assert_eq!(missed.message, format!("Sorry, I didn't catch that. {PROMPT}"));
    assert!(missed.tool_calls.is_empty());
    assert_eq!(row_volume(&coach).await, (3, 10));
    assert_eq!(sink.named("clarification_mismatch").len(), 1);

    let done = coach.orchestrator.handle_turn("s-1", "u-1", "the sets please").await;
    assert!(!done.awaiting_clarification());
    assert_eq!(done.message, "Updated sets: Dumbbell Row 6x10");
    assert_eq!(row_volume(&coach).await, (6, 10));
}

#[tokio::test]
async fn test_both_label_scales_sets_and_reps() {
    let (coach, _) = coach().await;
    coach.orchestrator.handle_turn("s-1", "u-1", "Double it").await;
    let done = coach.orchestrator.handle_turn("s-1", "u-1", "both").await;
    assert!(done.tool_calls[0].success);
    assert_eq!(row_volume(&coach).await, (6, 20));
}

#[tokio::test]
async fn test_new_actionable_request_supersedes_pending_question() {
    let (coach, sink) = coach().await;
    coach.orchestrator.handle_turn("s-1", "u-1", "Double it").await;

    let created = coach
        .orchestrator
        .handle_turn("s-1", "u-1", "actually build me a core workout")
        .await;
    assert_eq!(created.dialogue, DialogueState::Idle);
    assert_eq!(created.intent, "create_workout");
    assert_eq!(created.tool_calls.len(), 1);
    assert!(created.tool_calls[0].success);
    assert!(sink.named("clarification_mismatch").is_empty());

    let workout = coach.book.active("s-1").await.unwrap();
    assert_eq!(workout.name, "Core day");
    assert_eq!(workout.exercises[0].name, "Plank");
    assert_eq!((workout.exercises[0].sets, workout.exercises[0].reps), (3, 45));
}

#[tokio::test]
async fn test_history_records_every_turn() {
    let (coach, _) = coach().await;
    coach.orchestrator.handle_turn("s-1", "u-1", "Double it").await;
    coach.orchestrator.handle_turn("s-1", "u-1", "2").await;

    let messages = coach.state.recent_messages("s-1", 10).await.unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "tool", "assistant"]);
    assert_eq!(messages.last().unwrap().content, "Updated reps: Dumbbell Row 3x20");
}
