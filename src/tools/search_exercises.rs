//! search_exercises：按描述返回排序后的多个候选动作

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::matcher::{ExerciseMatcher, MatchOptions};
use crate::tools::find_exercise::match_to_json;
use crate::tools::params::SEARCH_EXERCISES;
use crate::tools::{Tool, ToolContext, ToolParams};

const MAX_LIMIT: usize = 20;

pub struct SearchExercisesTool {
    matcher: Arc<ExerciseMatcher>,
}

impl SearchExercisesTool {
    pub fn new(matcher: Arc<ExerciseMatcher>) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl Tool for SearchExercisesTool {
    fn name(&self) -> &str {
        SEARCH_EXERCISES
    }

    fn description(&self) -> &str {
        "List several catalog exercises matching a description, best first"
    }

    fn validate(&self, params: &ToolParams, ctx: &ToolContext) -> Result<(), ToolError> {
        let ToolParams::SearchExercises(p) = params else {
            return Err(ToolError::validation("search_exercises received foreign params"));
        };
        if p.limit == 0 || p.limit > MAX_LIMIT {
            return Err(ToolError::validation(format!("limit must be within 1..={MAX_LIMIT}")));
        }
        if ctx.resolve_query(p.query.as_deref()).is_none() {
            return Err(ToolError::validation("search_exercises needs a query"));
        }
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ToolParams::SearchExercises(p) = params else {
            return Err(ToolError::validation("search_exercises received foreign params"));
        };
        let query = ctx
            .resolve_query(p.query.as_deref())
            .ok_or_else(|| ToolError::validation("search_exercises needs a query"))?;
        let options = MatchOptions {
            equipment: p.equipment.clone(),
            exclude: p.exclude.clone(),
            min_confidence: p.min_confidence,
        };
        let matches = self.matcher.find_many(query, &options, p.limit);
        if matches.is_empty() {
            return Err(ToolError::MatchNotFound {
                query: query.to_string(),
            });
        }
        let names: Vec<&str> = matches.iter().map(|m| m.exercise.name.as_str()).collect();
        Ok(json!({
            "matches": matches.iter().map(match_to_json).collect::<Vec<_>>(),
            "message": format!("Found {}: {}", matches.len(), names.join(", ")),
        }))
    }
}
