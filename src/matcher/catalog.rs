//! 动作目录
//!
//! 目录、别名、同义词与肌群兜底动作都是数据：默认使用内置的 data/catalog.toml，
//! 可通过 `[matcher].catalog_path` 指向外部文件。加载时所有键统一规范化，
//! 别名与兜底动作必须引用目录中已存在的动作名。

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalize::{fold_token, normalize};

const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.toml");

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Catalog has no exercises")]
    Empty,

    #[error("Duplicate exercise id: {0}")]
    DuplicateId(String),

    #[error("{section} entry '{key}' references unknown exercise '{target}'")]
    UnknownReference {
        section: &'static str,
        key: String,
        target: String,
    },
}

/// 目录中的一个动作
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
    pub id: String,
    pub name: String,
    pub primary_muscles: Vec<String>,
    #[serde(default)]
    pub secondary_muscles: Vec<String>,
    pub equipment: String,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    exercise: Vec<ExerciseRecord>,
    #[serde(default)]
    aliases: HashMap<String, String>,
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
    #[serde(default)]
    fallbacks: HashMap<String, String>,
}

/// 加载并索引后的目录
#[derive(Debug, Clone)]
pub struct Catalog {
    records: Vec<ExerciseRecord>,
    by_name: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
    synonyms: HashMap<String, Vec<String>>,
    fallbacks: HashMap<String, usize>,
}

impl Catalog {
    /// 内置目录
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        if file.exercise.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut by_name = HashMap::new();
        let mut ids = HashMap::new();
        for (idx, record) in file.exercise.iter().enumerate() {
            if ids.insert(record.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateId(record.id.clone()));
            }
            by_name.insert(normalize(&record.name), idx);
        }

        let resolve = |section: &'static str, key: &str, target: &str| {
            by_name
                .get(&normalize(target))
                .copied()
                .ok_or_else(|| CatalogError::UnknownReference {
                    section,
                    key: key.to_string(),
                    target: target.to_string(),
                })
        };

        let mut aliases = HashMap::new();
        for (alias, target) in &file.aliases {
            aliases.insert(normalize(alias), resolve("aliases", alias, target)?);
        }
        let mut fallbacks = HashMap::new();
        for (muscle, target) in &file.fallbacks {
            fallbacks.insert(fold_token(muscle), resolve("fallbacks", muscle, target)?);
        }
        let synonyms = file
            .synonyms
            .iter()
            .map(|(word, targets)| {
                (
                    fold_token(word),
                    targets.iter().map(|t| fold_token(t)).collect(),
                )
            })
            .collect();

        Ok(Self {
            records: file.exercise,
            by_name,
            aliases,
            synonyms,
            fallbacks,
        })
    }

    pub fn records(&self) -> &[ExerciseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ExerciseRecord> {
        self.records.get(idx)
    }

    /// 按规范化名精确查找
    pub fn by_normalized_name(&self, normalized: &str) -> Option<usize> {
        self.by_name.get(normalized).copied()
    }

    pub fn by_alias(&self, normalized: &str) -> Option<usize> {
        self.aliases.get(normalized).copied()
    }

    /// 查询词的同义展开（不含词本身）
    pub fn synonyms_of(&self, folded: &str) -> &[String] {
        self.synonyms.get(folded).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fallback_for(&self, folded_muscle: &str) -> Option<usize> {
        self.fallbacks.get(folded_muscle).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads_and_indexes() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.len() >= 30);
        let idx = catalog.by_normalized_name("dumbbell-row").unwrap();
        assert_eq!(catalog.get(idx).unwrap().id, "dumbbell-row");
        let bench = catalog.by_alias("bench").unwrap();
        assert_eq!(catalog.get(bench).unwrap().name, "Barbell Bench Press");
        let chest = catalog.fallback_for("chest").unwrap();
        assert_eq!(catalog.get(chest).unwrap().name, "Push-up");
        assert!(catalog.synonyms_of("weight").contains(&"dumbbell".to_string()));
    }

    #[test]
    fn test_alias_to_unknown_exercise_is_rejected() {
        let raw = r#"
            [[exercise]]
            id = "plank"
            name = "Plank"
            primary_muscles = ["core"]
            equipment = "bodyweight"

            [aliases]
            "hollow hold" = "Hollow Body Hold"
        "#;
        let err = Catalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownReference { section: "aliases", .. }));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let raw = r#"
            [[exercise]]
            id = "plank"
            name = "Plank"
            primary_muscles = ["core"]
            equipment = "bodyweight"

            [[exercise]]
            id = "plank"
            name = "Side Plank"
            primary_muscles = ["core"]
            equipment = "bodyweight"
        "#;
        assert!(matches!(
            Catalog::from_toml_str(raw),
            Err(CatalogError::DuplicateId(_))
        ));
    }
}
