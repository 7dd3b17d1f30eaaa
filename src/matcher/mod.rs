//! 动作匹配
//!
//! 把自由文本解析为目录中的动作，策略按固定顺序尝试：
//! 精确名 → 别名 → 模糊（编辑距离）→ 语义（肌群/器械/名称词命中）→ 肌群兜底。
//! 单结果模式取第一个达到置信度下限的策略；多结果模式汇总所有策略、按 id 去重后降序截断。

pub mod catalog;
pub mod normalize;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::MatcherSection;
use crate::observability::{CoachEvent, EventSink};

pub use catalog::{Catalog, CatalogError, ExerciseRecord};
use normalize::{fold_token, fuzzy_similarity, normalize, tokenize};

/// 兜底：查询直接包含肌群词
const FALLBACK_DIRECT_CONFIDENCE: f64 = 0.5;
/// 兜底：经同义词才命中肌群
const FALLBACK_SYNONYM_CONFIDENCE: f64 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Alias,
    Fuzzy,
    Semantic,
    Fallback,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Alias => "alias",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Semantic => "semantic",
            MatchType::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExerciseMatch {
    pub exercise: ExerciseRecord,
    pub confidence: f64,
    pub match_type: MatchType,
    pub reasoning: String,
}

/// 匹配过滤条件
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchOptions {
    pub equipment: Option<String>,
    pub exclude: Vec<String>,
    /// 单结果模式缺省取配置的 min_confidence；多结果模式缺省不过滤
    pub min_confidence: Option<f64>,
}

impl MatchOptions {
    pub fn with_equipment(mut self, equipment: impl Into<String>) -> Self {
        self.equipment = Some(equipment.into());
        self
    }

    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    fn cache_key(&self, normalized_query: &str) -> String {
        let mut exclude: Vec<String> = self.exclude.iter().map(|e| normalize(e)).collect();
        exclude.sort();
        format!(
            "{}|{}|{}",
            normalized_query,
            self.equipment.as_deref().map(normalize).unwrap_or_default(),
            exclude.join(",")
        )
    }
}

/// 预先折叠好的语义特征
#[derive(Debug)]
struct Features {
    primary: HashSet<String>,
    secondary: HashSet<String>,
    equipment: String,
    name_tokens: HashSet<String>,
}

impl Features {
    fn of(record: &ExerciseRecord) -> Self {
        Self {
            primary: record.primary_muscles.iter().map(|m| fold_token(m)).collect(),
            secondary: record.secondary_muscles.iter().map(|m| fold_token(m)).collect(),
            equipment: fold_token(&record.equipment),
            name_tokens: tokenize(&record.name).into_iter().collect(),
        }
    }
}

/// 多策略动作匹配器（目录只读，语义打分按查询+过滤条件缓存）
pub struct ExerciseMatcher {
    catalog: Catalog,
    config: MatcherSection,
    features: Vec<Features>,
    muscle_vocab: HashSet<String>,
    equipment_vocab: HashSet<String>,
    name_vocab: HashSet<String>,
    semantic_cache: Mutex<HashMap<String, Arc<Vec<(usize, f64, String)>>>>,
    events: Arc<dyn EventSink>,
}

impl ExerciseMatcher {
    pub fn new(catalog: Catalog, config: MatcherSection, events: Arc<dyn EventSink>) -> Self {
        let features: Vec<Features> = catalog.records().iter().map(Features::of).collect();
        let mut muscle_vocab = HashSet::new();
        let mut equipment_vocab = HashSet::new();
        let mut name_vocab = HashSet::new();
        for f in &features {
            muscle_vocab.extend(f.primary.iter().cloned());
            muscle_vocab.extend(f.secondary.iter().cloned());
            equipment_vocab.insert(f.equipment.clone());
            name_vocab.extend(f.name_tokens.iter().cloned());
        }
        Self {
            catalog,
            config,
            features,
            muscle_vocab,
            equipment_vocab,
            name_vocab,
            semantic_cache: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 单结果模式：返回第一个达到置信度下限的策略结果
    pub fn find_best(&self, query: &str, options: &MatchOptions) -> Option<ExerciseMatch> {
        let norm = normalize(query);
        if norm.is_empty() {
            return None;
        }
        let floor = options.min_confidence.unwrap_or(self.config.min_confidence);
        let allowed = self.allowed(options);

        let clears = |m: &ExerciseMatch| m.confidence >= floor;

        let found = self
            .exact(&norm, &allowed)
            .filter(clears)
            .or_else(|| self.alias(&norm, &allowed).filter(clears))
            .or_else(|| self.fuzzy(&norm, &allowed).into_iter().next().filter(clears))
            .or_else(|| {
                self.semantic(query, options, &allowed, self.config.semantic_threshold)
                    .into_iter()
                    .next()
                    .filter(clears)
            })
            .or_else(|| self.fallback(query, &allowed).filter(clears))?;

        self.events.emit(CoachEvent::MatchStrategy {
            query: query.to_string(),
            strategy: found.match_type.as_str().to_string(),
            confidence: found.confidence,
        });
        Some(found)
    }

    /// 多结果模式：汇总所有策略，按 id 去重（先出现者保留），降序排序后截断到 limit
    pub fn find_many(&self, query: &str, options: &MatchOptions, limit: usize) -> Vec<ExerciseMatch> {
        let norm = normalize(query);
        if norm.is_empty() || limit == 0 {
            return Vec::new();
        }
        let allowed = self.allowed(options);

        let mut candidates: Vec<ExerciseMatch> = Vec::new();
        candidates.extend(self.exact(&norm, &allowed));
        candidates.extend(self.alias(&norm, &allowed));
        candidates.extend(self.fuzzy(&norm, &allowed));
        candidates.extend(self.semantic(
            query,
            options,
            &allowed,
            self.config.semantic_multi_threshold,
        ));
        candidates.extend(self.fallback(query, &allowed));

        let mut seen = HashSet::new();
        let mut results: Vec<ExerciseMatch> = candidates
            .into_iter()
            .filter(|m| seen.insert(m.exercise.id.clone()))
            .filter(|m| options.min_confidence.map_or(true, |min| m.confidence >= min))
            .collect();
        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results.truncate(limit);

        if let Some(top) = results.first() {
            self.events.emit(CoachEvent::MatchStrategy {
                query: query.to_string(),
                strategy: top.match_type.as_str().to_string(),
                confidence: top.confidence,
            });
        }
        results
    }

    /// 仅兜底策略：查询中出现的肌群词 → 该肌群的默认动作（不受置信度下限约束）
    pub fn fallback_match(&self, query: &str, options: &MatchOptions) -> Option<ExerciseMatch> {
        let found = self.fallback(query, &self.allowed(options))?;
        self.events.emit(CoachEvent::MatchStrategy {
            query: query.to_string(),
            strategy: found.match_type.as_str().to_string(),
            confidence: found.confidence,
        });
        Some(found)
    }

    /// 已缓存的语义打分条目数
    pub fn semantic_cache_len(&self) -> usize {
        self.semantic_cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn allowed(&self, options: &MatchOptions) -> Vec<bool> {
        let equipment = options.equipment.as_deref().map(|e| fold_token(&normalize(e)));
        let excluded: HashSet<String> = options.exclude.iter().map(|e| normalize(e)).collect();
        self.catalog
            .records()
            .iter()
            .zip(&self.features)
            .map(|(record, features)| {
                equipment.as_ref().map_or(true, |e| *e == features.equipment)
                    && !excluded.contains(&normalize(&record.name))
            })
            .collect()
    }

    fn build(&self, idx: usize, confidence: f64, match_type: MatchType, reasoning: String) -> Option<ExerciseMatch> {
        let exercise = self.catalog.get(idx)?.clone();
        Some(ExerciseMatch {
            exercise,
            confidence: confidence.clamp(0.0, 1.0),
            match_type,
            reasoning,
        })
    }

    fn exact(&self, norm: &str, allowed: &[bool]) -> Option<ExerciseMatch> {
        let idx = self.catalog.by_normalized_name(norm).filter(|i| allowed[*i])?;
        self.build(idx, 1.0, MatchType::Exact, "exact name match".to_string())
    }

    fn alias(&self, norm: &str, allowed: &[bool]) -> Option<ExerciseMatch> {
        let idx = self.catalog.by_alias(norm).filter(|i| allowed[*i])?;
        let target = &self.catalog.get(idx)?.name;
        self.build(
            idx,
            self.config.alias_confidence,
            MatchType::Alias,
            format!("'{}' is a known alias of {}", norm, target),
        )
    }

    /// 达到模糊阈值的全部候选，按相似度降序（同分保持目录顺序）
    fn fuzzy(&self, norm: &str, allowed: &[bool]) -> Vec<ExerciseMatch> {
        let mut scored: Vec<(usize, f64)> = self
            .catalog
            .records()
            .iter()
            .enumerate()
            .filter(|(idx, _)| allowed[*idx])
            .map(|(idx, record)| (idx, fuzzy_similarity(norm, &normalize(&record.name))))
            .filter(|(_, sim)| *sim >= self.config.fuzzy_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .filter_map(|(idx, sim)| {
                self.build(
                    idx,
                    sim * self.config.fuzzy_weight,
                    MatchType::Fuzzy,
                    format!("edit similarity {:.2} to '{}'", sim, normalize(&self.catalog.records()[idx].name)),
                )
            })
            .collect()
    }

    /// 达到阈值的语义候选，按得分降序
    fn semantic(
        &self,
        query: &str,
        options: &MatchOptions,
        allowed: &[bool],
        threshold: f64,
    ) -> Vec<ExerciseMatch> {
        let scored = self.semantic_scores(query, options, allowed);
        scored
            .iter()
            .filter(|(_, score, _)| *score >= threshold)
            .filter_map(|(idx, score, hits)| {
                self.build(
                    *idx,
                    score * self.config.semantic_weight,
                    MatchType::Semantic,
                    format!("matched {} (score {:.2})", hits, score),
                )
            })
            .collect()
    }

    fn semantic_scores(
        &self,
        query: &str,
        options: &MatchOptions,
        allowed: &[bool],
    ) -> Arc<Vec<(usize, f64, String)>> {
        let key = options.cache_key(&normalize(query));
        if let Ok(cache) = self.semantic_cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Arc::clone(hit);
            }
        }

        let expanded: Vec<(String, HashSet<String>)> = tokenize(query)
            .into_iter()
            .map(|token| {
                let mut set: HashSet<String> = self.catalog.synonyms_of(&token).iter().cloned().collect();
                set.insert(token.clone());
                (token, set)
            })
            .collect();

        let mut scored: Vec<(usize, f64, String)> = self
            .features
            .iter()
            .enumerate()
            .filter(|(idx, _)| allowed[*idx])
            .filter_map(|(idx, features)| {
                let (score, hits) = self.score_record(&expanded, features);
                (score > 0.0).then(|| (idx, score, hits.join(", ")))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let scored = Arc::new(scored);
        if let Ok(mut cache) = self.semantic_cache.lock() {
            cache.insert(key, Arc::clone(&scored));
        }
        scored
    }

    /// 每个查询词对三个因子分别计分：分母为该词能在目录词表中命中的因子权重之和，
    /// 分子为该动作实际命中的权重（次要肌群按一半计）
    fn score_record(&self, expanded: &[(String, HashSet<String>)], features: &Features) -> (f64, Vec<String>) {
        let mut addressed = 0.0;
        let mut hit = 0.0;
        let mut hits = Vec::new();
        for (token, set) in expanded {
            let mut token_hit = false;

            if set.iter().any(|t| self.muscle_vocab.contains(t)) {
                addressed += self.config.muscle_weight;
                if set.iter().any(|t| features.primary.contains(t)) {
                    hit += self.config.muscle_weight;
                    token_hit = true;
                } else if set.iter().any(|t| features.secondary.contains(t)) {
                    hit += self.config.muscle_weight / 2.0;
                    token_hit = true;
                }
            }
            if set.iter().any(|t| self.equipment_vocab.contains(t)) {
                addressed += self.config.equipment_weight;
                if set.contains(&features.equipment) {
                    hit += self.config.equipment_weight;
                    token_hit = true;
                }
            }
            if set.iter().any(|t| self.name_vocab.contains(t)) {
                addressed += self.config.name_weight;
                if set.iter().any(|t| features.name_tokens.contains(t)) {
                    hit += self.config.name_weight;
                    token_hit = true;
                }
            }
            if token_hit {
                hits.push(token.clone());
            }
        }
        if addressed <= 0.0 {
            return (0.0, hits);
        }
        (hit / addressed, hits)
    }

    fn fallback(&self, query: &str, allowed: &[bool]) -> Option<ExerciseMatch> {
        let tokens = tokenize(query);
        let direct = tokens.iter().find_map(|t| {
            self.catalog
                .fallback_for(t)
                .filter(|i| allowed[*i])
                .map(|idx| (idx, t.clone(), FALLBACK_DIRECT_CONFIDENCE))
        });
        let (idx, muscle, confidence) = direct.or_else(|| {
            tokens.iter().find_map(|t| {
                self.catalog.synonyms_of(t).iter().find_map(|syn| {
                    self.catalog
                        .fallback_for(syn)
                        .filter(|i| allowed[*i])
                        .map(|idx| (idx, syn.clone(), FALLBACK_SYNONYM_CONFIDENCE))
                })
            })
        })?;
        self.build(
            idx,
            confidence,
            MatchType::Fallback,
            format!("default exercise for {}", muscle),
        )
    }
}
