//! 训练计划簿：每个会话一份当前计划，外加已保存计划列表

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutExercise {
    pub exercise_id: String,
    pub name: String,
    pub sets: u32,
    pub reps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub name: String,
    pub exercises: Vec<WorkoutExercise>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Workout {
    pub fn new(name: impl Into<String>, exercises: Vec<WorkoutExercise>) -> Self {
        Self {
            id: format!("workout_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            exercises,
            created_at: Utc::now(),
            saved_at: None,
        }
    }

    /// 形如 "Dumbbell Row 3x10, Plank 3x30"
    pub fn describe(&self) -> String {
        self.exercises
            .iter()
            .map(|e| format!("{} {}x{}", e.name, e.sets, e.reps))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Default)]
pub struct WorkoutBook {
    active: RwLock<HashMap<String, Workout>>,
    saved: RwLock<HashMap<String, Vec<Workout>>>,
}

impl WorkoutBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active(&self, session_id: &str) -> Option<Workout> {
        self.active.read().await.get(session_id).cloned()
    }

    pub async fn set_active(&self, session_id: &str, workout: Workout) {
        self.active
            .write()
            .await
            .insert(session_id.to_string(), workout);
    }

    /// 原地修改当前计划，返回修改后的副本；无当前计划时返回 None
    pub async fn update_active<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Workout) -> T,
    ) -> Option<(Workout, T)> {
        let mut active = self.active.write().await;
        let workout = active.get_mut(session_id)?;
        let out = f(workout);
        Some((workout.clone(), out))
    }

    /// 保存当前计划（可改名），返回保存后的副本
    pub async fn save_active(&self, session_id: &str, name: Option<&str>) -> Option<Workout> {
        let (saved, _) = self
            .update_active(session_id, |w| {
                if let Some(name) = name {
                    w.name = name.to_string();
                }
                w.saved_at = Some(Utc::now());
            })
            .await?;
        self.saved
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(saved.clone());
        Some(saved)
    }

    pub async fn saved(&self, session_id: &str) -> Vec<Workout> {
        self.saved
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 丢弃会话的当前计划与已保存计划
    pub async fn forget(&self, session_id: &str) {
        self.active.write().await.remove(session_id);
        self.saved.write().await.remove(session_id);
    }

    /// 持有当前计划或已保存计划的会话数
    pub async fn session_count(&self) -> usize {
        let active = self.active.read().await;
        let saved = self.saved.read().await;
        let only_saved = saved.keys().filter(|k| !active.contains_key(*k)).count();
        active.len() + only_saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> WorkoutExercise {
        WorkoutExercise {
            exercise_id: "dumbbell-row".into(),
            name: "Dumbbell Row".into(),
            sets: 3,
            reps: 10,
        }
    }

    #[tokio::test]
    async fn test_active_workout_is_per_session() {
        let book = WorkoutBook::new();
        book.set_active("a", Workout::new("Pull day", vec![row()])).await;
        assert!(book.active("b").await.is_none());
        assert_eq!(book.active("a").await.unwrap().describe(), "Dumbbell Row 3x10");
    }

    #[tokio::test]
    async fn test_save_stamps_and_records() {
        let book = WorkoutBook::new();
        assert!(book.save_active("a", None).await.is_none());
        book.set_active("a", Workout::new("Pull day", vec![row()])).await;
        let saved = book.save_active("a", Some("Monday pull")).await.unwrap();
        assert_eq!(saved.name, "Monday pull");
        assert!(saved.saved_at.is_some());
        assert_eq!(book.saved("a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_forget_drops_only_that_session() {
        let book = WorkoutBook::new();
        book.set_active("a", Workout::new("Pull day", vec![row()])).await;
        book.save_active("a", None).await.unwrap();
        book.set_active("b", Workout::new("Leg day", vec![row()])).await;
        assert_eq!(book.session_count().await, 2);

        book.forget("a").await;
        assert!(book.active("a").await.is_none());
        assert!(book.saved("a").await.is_empty());
        assert!(book.active("b").await.is_some());
        assert_eq!(book.session_count().await, 1);
    }
}
