//! 用户画像
//!
//! 会话首轮时取一次画像摘要作为合成的首条 system 消息，并缓存在会话状态里。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    #[serde(default)]
    pub fitness_level: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub available_equipment: Vec<String>,
    #[serde(default)]
    pub injuries: Vec<String>,
}

impl UserProfile {
    /// 单行画像摘要
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("User: {}", self.display_name)];
        if let Some(level) = &self.fitness_level {
            parts.push(format!("level: {}", level));
        }
        if !self.goals.is_empty() {
            parts.push(format!("goals: {}", self.goals.join(", ")));
        }
        if !self.available_equipment.is_empty() {
            parts.push(format!("equipment: {}", self.available_equipment.join(", ")));
        }
        if !self.injuries.is_empty() {
            parts.push(format!("injuries: {}", self.injuries.join(", ")));
        }
        parts.join("; ")
    }
}

/// 画像来源
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Option<UserProfile>;
}

/// 固定画像表（测试与离线运行）
#[derive(Debug, Default)]
pub struct StaticProfileProvider {
    profiles: HashMap<String, UserProfile>,
}

impl StaticProfileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, user_id: &str, profile: UserProfile) -> Self {
        self.profiles.insert(user_id.to_string(), profile);
        self
    }
}

#[async_trait]
impl ProfileProvider for StaticProfileProvider {
    async fn fetch(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.get(user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_skips_empty_fields() {
        let profile = UserProfile {
            display_name: "Sam".into(),
            fitness_level: Some("intermediate".into()),
            goals: vec!["strength".into()],
            ..Default::default()
        };
        assert_eq!(profile.summary(), "User: Sam; level: intermediate; goals: strength");
    }
}
