//! 工具参数
//!
//! 内置工具的参数是一个带标签的枚举 `{"tool": name, "args": {...}}`，解析失败即 Validation 错误；
//! 外部注册的工具走 Extension 变体，参数原样交给工具自己校验。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::ToolError;

pub const FIND_EXERCISE: &str = "find_exercise";
pub const SEARCH_EXERCISES: &str = "search_exercises";
pub const CREATE_WORKOUT: &str = "create_workout";
pub const MODIFY_WORKOUT: &str = "modify_workout";
pub const SAVE_WORKOUT: &str = "save_workout";

const BUILTIN_TOOLS: &[&str] = &[
    FIND_EXERCISE,
    SEARCH_EXERCISES,
    CREATE_WORKOUT,
    MODIFY_WORKOUT,
    SAVE_WORKOUT,
];

/// 单个动作查找
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FindExerciseParams {
    /// 动作名或描述；缺省时使用用户原话
    #[serde(default)]
    pub query: Option<String>,
    /// 只接受该器械（barbell、dumbbell、cable、bodyweight 等）
    #[serde(default)]
    pub equipment: Option<String>,
    /// 排除的动作名
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

fn default_search_limit() -> usize {
    5
}

/// 多结果动作检索
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchExercisesParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_sets() -> u32 {
    3
}

fn default_reps() -> u32 {
    10
}

/// 新建训练计划；exercises 为空时取前面步骤找到的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreateWorkoutParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exercises: Vec<String>,
    #[serde(default = "default_sets")]
    pub sets: u32,
    #[serde(default = "default_reps")]
    pub reps: u32,
}

/// 修改的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModField {
    Sets,
    Reps,
    Both,
}

impl ModField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModField::Sets => "sets",
            ModField::Reps => "reps",
            ModField::Both => "both",
        }
    }
}

/// 修改方式：按倍数缩放、直接设定、增减
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModOp {
    Scale,
    Set,
    Add,
}

/// 修改当前训练计划中一个或全部动作的组数/次数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModifyWorkoutParams {
    /// 目标动作；缺省为全部动作
    #[serde(default)]
    pub exercise: Option<String>,
    pub field: ModField,
    pub operation: ModOp,
    /// scale 时为倍数，set 时为目标值，add 时为增量
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SaveWorkoutParams {
    #[serde(default)]
    pub name: Option<String>,
}

/// 合法的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolParams {
    FindExercise(FindExerciseParams),
    SearchExercises(SearchExercisesParams),
    CreateWorkout(CreateWorkoutParams),
    ModifyWorkout(ModifyWorkoutParams),
    SaveWorkout(SaveWorkoutParams),
    /// 外部注册的工具
    #[serde(skip)]
    Extension { tool: String, args: Value },
}

impl ToolParams {
    /// 内置工具的参数由 ToolParams 自身的 schema 描述
    pub fn is_builtin(tool: &str) -> bool {
        BUILTIN_TOOLS.contains(&tool)
    }

    /// 按工具名解析参数；args 为 null 视为空对象
    pub fn parse(tool: &str, args: Value) -> Result<Self, ToolError> {
        let args = if args.is_null() { json!({}) } else { args };
        if !BUILTIN_TOOLS.contains(&tool) {
            return Ok(ToolParams::Extension {
                tool: tool.to_string(),
                args,
            });
        }
        if !args.is_object() {
            return Err(ToolError::validation(format!("{tool}: args must be an object")));
        }
        serde_json::from_value(json!({ "tool": tool, "args": args }))
            .map_err(|e| ToolError::validation(format!("{tool}: {e}")))
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolParams::FindExercise(_) => FIND_EXERCISE,
            ToolParams::SearchExercises(_) => SEARCH_EXERCISES,
            ToolParams::CreateWorkout(_) => CREATE_WORKOUT,
            ToolParams::ModifyWorkout(_) => MODIFY_WORKOUT,
            ToolParams::SaveWorkout(_) => SAVE_WORKOUT,
            ToolParams::Extension { tool, .. } => tool,
        }
    }
}
