//! FitCoach - 健身教练助手的智能体核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排、澄清对话、意图计划、恢复、会话监管
//! - **llm**: 补全服务抽象与实现（OpenAI 兼容 / Mock）
//! - **matcher**: 动作目录与多级动作匹配
//! - **memory**: 会话状态、任务上下文与持久化
//! - **observability**: 日志初始化与结构化事件
//! - **tools**: 工具注册、重试 / 熔断 / 降级执行器与健身工具

pub mod config;
pub mod core;
pub mod llm;
pub mod matcher;
pub mod memory;
pub mod observability;
pub mod tools;
