//! 构建器：从 AppConfig 统一组装存储、补全服务、动作目录、工具与编排器
//!
//! REPL 与测试走同一条组装路径；补全服务、事件接收端与画像来源可以替换。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{Orchestrator, StateError, StoreError};
use crate::llm::{create_completion_from_config, CompletionService};
use crate::matcher::{Catalog, CatalogError, ExerciseMatcher};
use crate::memory::{
    ContextBudget, ConversationStateManager, InMemorySessionStore, ProfileProvider, SessionStore,
    SqliteSessionStore, StaticProfileProvider,
};
use crate::observability::{EventSink, TracingSink};
use crate::tools::{
    CreateWorkoutTool, FindExerciseTool, ModifyWorkoutTool, SaveWorkoutTool, SearchExercisesTool,
    ToolExecutor, ToolRegistry, WorkoutBook,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("session store: {0}")]
    Store(#[from] StoreError),

    #[error("unknown store backend: {0}")]
    UnknownBackend(String),
}

/// 组装好的教练核心
pub struct Coach {
    pub orchestrator: Arc<Orchestrator>,
    pub state: Arc<ConversationStateManager>,
    pub executor: Arc<ToolExecutor>,
    pub matcher: Arc<ExerciseMatcher>,
    pub book: Arc<WorkoutBook>,
}

impl Coach {
    /// 结束会话：取消进行中的回合，删除持久化状态，释放监管与计划簿里的会话条目
    pub async fn end_session(&self, session_id: &str) -> Result<(), StateError> {
        let supervisor = self.orchestrator.supervisor();
        supervisor.cancel(session_id);
        supervisor.forget(session_id);
        self.book.forget(session_id).await;
        self.state.cleanup(session_id).await?;
        tracing::info!(session_id, "session ended");
        Ok(())
    }
}

pub struct CoachBuilder {
    config: AppConfig,
    completion: Option<Arc<dyn CompletionService>>,
    events: Option<Arc<dyn EventSink>>,
    profiles: Option<Arc<dyn ProfileProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    catalog: Option<Catalog>,
}

impl CoachBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            completion: None,
            events: None,
            profiles: None,
            store: None,
            catalog: None,
        }
    }

    /// 替换补全服务（默认按 [llm].provider 创建）
    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// 替换事件接收端（默认 TracingSink）
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileProvider>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// 替换会话存储（默认按 [store].backend 创建）
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 按 [store] 段创建会话存储
    pub fn build_store(&self) -> Result<Arc<dyn SessionStore>, BuildError> {
        match self.config.store.backend.as_str() {
            "memory" => Ok(Arc::new(InMemorySessionStore::new())),
            "sqlite" => {
                tracing::info!(path = %self.config.store.sqlite_path.display(), "using sqlite session store");
                Ok(Arc::new(SqliteSessionStore::open(&self.config.store.sqlite_path)?))
            }
            other => Err(BuildError::UnknownBackend(other.to_string())),
        }
    }

    /// 内置目录或 [matcher].catalog_path 指定的目录
    pub fn build_catalog(&self) -> Result<Catalog, BuildError> {
        Ok(match &self.config.matcher.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin()?,
        })
    }

    /// 注册全部工具（REPL 与测试共享同一套）
    pub fn build_tool_registry(matcher: &Arc<ExerciseMatcher>, book: &Arc<WorkoutBook>) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(FindExerciseTool::new(Arc::clone(matcher)));
        tools.register(SearchExercisesTool::new(Arc::clone(matcher)));
        tools.register(CreateWorkoutTool::new(Arc::clone(matcher), Arc::clone(book)));
        tools.register(ModifyWorkoutTool::new(Arc::clone(book)));
        tools.register(SaveWorkoutTool::new(Arc::clone(book)));
        tools
    }

    pub fn build(self) -> Result<Coach, BuildError> {
        let events: Arc<dyn EventSink> = self.events.clone().unwrap_or_else(|| Arc::new(TracingSink));
        let store = match self.store.clone() {
            Some(store) => store,
            None => self.build_store()?,
        };
        let catalog = match self.catalog.clone() {
            Some(catalog) => catalog,
            None => self.build_catalog()?,
        };
        let completion = self
            .completion
            .clone()
            .unwrap_or_else(|| create_completion_from_config(&self.config));
        let profiles: Arc<dyn ProfileProvider> = self
            .profiles
            .clone()
            .unwrap_or_else(|| Arc::new(StaticProfileProvider::new()));

        tracing::info!(exercises = catalog.len(), "exercise catalog loaded");
        let matcher = Arc::new(ExerciseMatcher::new(
            catalog,
            self.config.matcher.clone(),
            Arc::clone(&events),
        ));
        let book = Arc::new(WorkoutBook::new());
        let registry = Self::build_tool_registry(&matcher, &book);
        let executor = Arc::new(ToolExecutor::new(
            registry,
            &self.config.tools,
            Arc::clone(&events),
        ));
        let state = Arc::new(ConversationStateManager::new(
            store,
            profiles,
            ContextBudget::from(&self.config.app),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&state),
            Arc::clone(&executor),
            completion,
            events,
            self.config.orchestrator.clone(),
        ));

        Ok(Coach {
            orchestrator,
            state,
            executor,
            matcher,
            book,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_registers_every_tool() {
        let coach = CoachBuilder::new(AppConfig::default()).build().unwrap();
        assert_eq!(
            coach.executor.tool_names(),
            vec![
                "create_workout",
                "find_exercise",
                "modify_workout",
                "save_workout",
                "search_exercises"
            ]
        );
        assert!(!coach.matcher.catalog().is_empty());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "redis".into();
        assert!(matches!(
            CoachBuilder::new(config).build(),
            Err(BuildError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_backend_opens_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.store.backend = "sqlite".into();
        config.store.sqlite_path = dir.path().join("sessions.db");
        let coach = CoachBuilder::new(config).build().unwrap();
        coach.state.initialize_state("s-1", "u-1").await.unwrap();
        assert!(dir.path().join("sessions.db").exists());
    }

    #[tokio::test]
    async fn test_end_session_releases_everything_for_that_session() {
        let coach = CoachBuilder::new(AppConfig::default())
            .with_completion(Arc::new(crate::llm::MockCompletionService::new()))
            .build()
            .unwrap();
        for session in ["s-1", "s-2"] {
            coach.orchestrator.handle_turn(session, "u-1", "hello coach").await;
            coach
                .book
                .set_active(session, crate::tools::Workout::new("Pull day", Vec::new()))
                .await;
        }
        coach.book.save_active("s-1", None).await.unwrap();
        assert_eq!(coach.orchestrator.supervisor().tracked_sessions(), 2);

        coach.end_session("s-1").await.unwrap();

        assert!(matches!(
            coach.state.get_state("s-1").await,
            Err(StateError::SessionNotFound(_))
        ));
        assert_eq!(coach.orchestrator.supervisor().tracked_sessions(), 1);
        assert!(coach.book.active("s-1").await.is_none());
        assert!(coach.book.saved("s-1").await.is_empty());
        assert_eq!(coach.book.session_count().await, 1);
        assert!(coach.state.get_state("s-2").await.is_ok());
    }
}
