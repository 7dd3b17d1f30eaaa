//! find_exercise：把一句描述解析为单个动作；未达置信度下限时兜底为肌群默认动作

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::matcher::{ExerciseMatch, ExerciseMatcher, MatchOptions};
use crate::tools::params::{FindExerciseParams, FIND_EXERCISE};
use crate::tools::{Tool, ToolContext, ToolParams};

pub struct FindExerciseTool {
    matcher: Arc<ExerciseMatcher>,
}

impl FindExerciseTool {
    pub fn new(matcher: Arc<ExerciseMatcher>) -> Self {
        Self { matcher }
    }

    fn unpack(params: &ToolParams) -> Result<&FindExerciseParams, ToolError> {
        match params {
            ToolParams::FindExercise(p) => Ok(p),
            other => Err(ToolError::validation(format!(
                "find_exercise received {} params",
                other.tool_name()
            ))),
        }
    }

    fn options(p: &FindExerciseParams) -> MatchOptions {
        MatchOptions {
            equipment: p.equipment.clone(),
            exclude: p.exclude.clone(),
            min_confidence: p.min_confidence,
        }
    }
}

pub(crate) fn match_to_json(m: &ExerciseMatch) -> Value {
    json!({
        "exercise": m.exercise,
        "confidence": m.confidence,
        "match_type": m.match_type,
        "reasoning": m.reasoning,
        "message": format!("{} ({})", m.exercise.name, m.match_type.as_str()),
    })
}

#[async_trait]
impl Tool for FindExerciseTool {
    fn name(&self) -> &str {
        FIND_EXERCISE
    }

    fn description(&self) -> &str {
        "Find the single catalog exercise that best matches a name or description"
    }

    fn validate(&self, params: &ToolParams, ctx: &ToolContext) -> Result<(), ToolError> {
        let p = Self::unpack(params)?;
        if ctx.resolve_query(p.query.as_deref()).is_none() {
            return Err(ToolError::validation("find_exercise needs a query"));
        }
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<Value, ToolError> {
        let p = Self::unpack(params)?;
        let query = ctx
            .resolve_query(p.query.as_deref())
            .ok_or_else(|| ToolError::validation("find_exercise needs a query"))?;
        self.matcher
            .find_best(query, &Self::options(p))
            .map(|m| match_to_json(&m))
            .ok_or_else(|| ToolError::MatchNotFound {
                query: query.to_string(),
            })
    }

    async fn fallback(
        &self,
        params: &ToolParams,
        error: &ToolError,
        _ctx: &ToolContext,
    ) -> Option<Result<Value, ToolError>> {
        let ToolError::MatchNotFound { query } = error else {
            return None;
        };
        let p = Self::unpack(params).ok()?;
        let options = MatchOptions {
            min_confidence: None,
            ..Self::options(p)
        };
        Some(
            self.matcher
                .fallback_match(query, &options)
                .map(|m| match_to_json(&m))
                .ok_or_else(|| error.clone()),
        )
    }
}
