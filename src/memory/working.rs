//! 中期记忆：当前任务（TaskContext）
//!
//! 编排器确定计划后创建任务；每个步骤声明所需工具与依赖，状态 pending → in_progress → completed / failed。
//! 所有步骤进入终态后任务即为终态，每个会话同一时间最多一个非终态任务。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// 创建任务时的步骤描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// 依赖的步骤名
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// 任务中的单个步骤
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub name: String,
    pub description: String,
    pub required_tools: Vec<String>,
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// 对单个步骤的局部更新
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepPatch {
    pub status: Option<StepStatus>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StepPatch {
    pub fn in_progress() -> Self {
        Self {
            status: Some(StepStatus::InProgress),
            ..Self::default()
        }
    }

    pub fn completed(output: Value) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Failed),
            output: None,
            error: Some(error.into()),
        }
    }
}

/// 当前任务
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    pub task_type: String,
    pub steps: Vec<TaskStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskContext {
    pub fn new(task_type: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        let now = Utc::now();
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| TaskStep {
                id: format!("step-{}", i + 1),
                name: s.name,
                description: s.description,
                required_tools: s.required_tools,
                dependencies: s.dependencies,
                status: StepStatus::Pending,
                output: None,
                error: None,
                started_at: None,
                completed_at: None,
            })
            .collect();
        let mut task = Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            task_type: task_type.into(),
            steps,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        // 空计划创建即终态
        task.refresh_terminal(now);
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn step(&self, step_id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// 应用 patch；返回 false 表示 step_id 不存在
    pub fn apply(&mut self, step_id: &str, patch: StepPatch) -> bool {
        let now = Utc::now();
        let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) else {
            return false;
        };
        if let Some(status) = patch.status {
            if status == StepStatus::InProgress && step.started_at.is_none() {
                step.started_at = Some(now);
            }
            if status.is_terminal() {
                step.completed_at = Some(now);
            }
            step.status = status;
        }
        if patch.output.is_some() {
            step.output = patch.output;
        }
        if patch.error.is_some() {
            step.error = patch.error;
        }
        self.updated_at = now;
        self.refresh_terminal(now);
        true
    }

    /// 把所有未完成步骤标记为失败，使任务进入终态
    pub fn abandon(&mut self, reason: &str) {
        let now = Utc::now();
        for step in self.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
            step.status = StepStatus::Failed;
            step.error = Some(reason.to_string());
            step.completed_at = Some(now);
        }
        self.updated_at = now;
        self.refresh_terminal(now);
    }

    fn refresh_terminal(&mut self, now: DateTime<Utc>) {
        if self.completed_at.is_none() && self.steps.iter().all(|s| s.status.is_terminal()) {
            self.completed_at = Some(now);
        }
    }

    /// 单行状态摘要，如 "create_workout: 1/2 completed, 1 failed"
    pub fn status_line(&self) -> String {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let failed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        let state = if self.is_terminal() { "finished" } else { "running" };
        format!(
            "{} ({}): {}/{} completed, {} failed",
            self.task_type,
            state,
            done,
            self.steps.len(),
            failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            name: name.to_string(),
            description: String::new(),
            required_tools: vec![],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_task_becomes_terminal_when_all_steps_finish() {
        let mut task = TaskContext::new("create_workout", vec![spec("find", &[]), spec("create", &["find"])]);
        assert!(!task.is_terminal());
        assert!(task.apply("step-1", StepPatch::in_progress()));
        assert!(task.step("step-1").unwrap().started_at.is_some());
        task.apply("step-1", StepPatch::completed(serde_json::json!({"ok": true})));
        assert!(!task.is_terminal());
        task.apply("step-2", StepPatch::failed("boom"));
        assert!(task.is_terminal());
        assert_eq!(task.step("step-2").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let mut task = TaskContext::new("t", vec![spec("a", &[])]);
        assert!(!task.apply("step-9", StepPatch::in_progress()));
    }

    #[test]
    fn test_abandon_fails_remaining_steps() {
        let mut task = TaskContext::new("t", vec![spec("a", &[]), spec("b", &[])]);
        task.apply("step-1", StepPatch::completed(Value::Null));
        task.abandon("turn aborted");
        assert!(task.is_terminal());
        assert_eq!(task.steps[0].status, StepStatus::Completed);
        assert_eq!(task.steps[1].status, StepStatus::Failed);
    }

    #[test]
    fn test_empty_plan_is_terminal() {
        let task = TaskContext::new("general", vec![]);
        assert!(task.is_terminal());
    }
}
