//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FITCOACH__*` 覆盖（双下划线表示嵌套，如 `FITCOACH__LLM__PROVIDER=openai`）。
//! 匹配权重、重试与熔断参数等启发式常量全部可配置。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub store: StoreSection,
    pub tools: ToolsSection,
    pub matcher: MatcherSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段：应用名与上下文窗口大小
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// getContextForAI 渲染的最近消息条数
    pub context_window_messages: usize,
    /// 单条消息渲染时的最大字符数
    pub max_message_chars: usize,
    /// 上下文片段总字符上限
    pub max_context_chars: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            context_window_messages: 10,
            max_message_chars: 280,
            max_context_chars: 4000,
        }
    }
}

/// [llm] 段：补全服务后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// mock / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [store] 段：会话存储后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// memory / sqlite
    pub backend: String,
    pub sqlite_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: PathBuf::from("data/sessions.db"),
        }
    }
}

/// [tools] 段：工具超时、默认重试与熔断策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub retry: RetrySection,
    pub circuit: CircuitSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            retry: RetrySection::default(),
            circuit: CircuitSection::default(),
        }
    }
}

/// [tools.retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
        }
    }
}

/// [tools.circuit] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitSection {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub monitoring_window_ms: u64,
}

impl Default for CircuitSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
        }
    }
}

/// [matcher] 段：动作匹配阈值与语义打分权重
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherSection {
    /// 自定义动作目录（TOML）；未设置时使用内置目录
    pub catalog_path: Option<PathBuf>,
    pub min_confidence: f64,
    pub alias_confidence: f64,
    pub fuzzy_threshold: f64,
    pub fuzzy_weight: f64,
    pub semantic_threshold: f64,
    pub semantic_multi_threshold: f64,
    pub semantic_weight: f64,
    pub muscle_weight: f64,
    pub equipment_weight: f64,
    pub name_weight: f64,
}

impl Default for MatcherSection {
    fn default() -> Self {
        Self {
            catalog_path: None,
            min_confidence: 0.7,
            alias_confidence: 0.95,
            fuzzy_threshold: 0.7,
            fuzzy_weight: 0.9,
            semantic_threshold: 0.6,
            semantic_multi_threshold: 0.5,
            semantic_weight: 0.8,
            muscle_weight: 0.3,
            equipment_weight: 0.2,
            name_weight: 0.4,
        }
    }
}

/// [orchestrator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 无工具步骤（纯对话）回合的置信度
    pub conversational_confidence: f64,
    /// 单个计划最多执行的步骤数，超出部分丢弃
    pub max_plan_steps: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            conversational_confidence: 0.8,
            max_plan_steps: 8,
        }
    }
}

/// 从 config 目录加载配置，环境变量 FITCOACH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FITCOACH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FITCOACH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
