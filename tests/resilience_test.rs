//! 工具执行韧性集成测试：经编排器驱动的重试、熔断与依赖跳过

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use fitcoach::config::{CircuitSection, OrchestratorSection, RetrySection, ToolsSection};
use fitcoach::core::{Orchestrator, ToolError, TransientKind};
use fitcoach::llm::MockCompletionService;
use fitcoach::memory::{
    ContextBudget, ConversationStateManager, InMemorySessionStore, StaticProfileProvider,
    StepStatus,
};
use fitcoach::observability::MemorySink;
use fitcoach::tools::{CircuitState, Tool, ToolContext, ToolExecutor, ToolParams, ToolRegistry};

/// 健康开关控制成败；不健康时返回网络错误
struct Wearable {
    healthy: AtomicBool,
    fail_first: AtomicU32,
    calls: AtomicU32,
}

impl Wearable {
    fn new(healthy: bool, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            fail_first: AtomicU32::new(fail_first),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Tool for Wearable {
    fn name(&self) -> &str {
        "sync_wearable"
    }

    fn description(&self) -> &str {
        "Pull today's sessions from the user's wearable"
    }

    async fn execute(&self, _params: &ToolParams, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy.load(Ordering::SeqCst) || n < self.fail_first.load(Ordering::SeqCst) {
            return Err(ToolError::transient(TransientKind::Network, "bluetooth dropped"));
        }
        Ok(json!({"message": "synced 2 sessions", "confidence": 0.8}))
    }
}

/// 始终失败且不可重试
struct BrokenScale;

#[async_trait]
impl Tool for BrokenScale {
    fn name(&self) -> &str {
        "read_scale"
    }

    fn description(&self) -> &str {
        "Read body weight from the smart scale"
    }

    async fn execute(&self, _params: &ToolParams, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::failed("scale firmware error"))
    }
}

const SYNC_PLAN: &str = r#"{"intent": "sync_log", "confidence": 0.9,
    "steps": [{"name": "sync", "tools": ["sync_wearable"]}]}"#;

const CHECKIN_PLAN: &str = r#"{"intent": "weekly_checkin", "confidence": 0.9,
    "steps": [
        {"name": "sync", "tools": ["sync_wearable"]},
        {"name": "weigh", "tools": ["read_scale"]},
        {"name": "trend", "description": "compare weight trend", "dependencies": ["weigh"]}
    ]}"#;

fn tools_section(max_retries: u32, threshold: u32) -> ToolsSection {
    ToolsSection {
        tool_timeout_secs: 5,
        retry: RetrySection {
            max_retries,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 1000,
        },
        circuit: CircuitSection {
            failure_threshold: threshold,
            reset_timeout_ms: 1_000,
            monitoring_window_ms: 60_000,
        },
    }
}

fn orchestrator(wearable: Arc<Wearable>, section: ToolsSection) -> (Orchestrator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut registry = ToolRegistry::new();
    registry.register_arc(wearable);
    registry.register(BrokenScale);
    let executor = Arc::new(ToolExecutor::new(registry, &section, sink.clone()));
    let state = Arc::new(ConversationStateManager::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(StaticProfileProvider::new()),
        ContextBudget::default(),
    ));
    let mock = MockCompletionService::new()
        .on_intent("sync", SYNC_PLAN)
        .on_intent("check-in", CHECKIN_PLAN);
    let orchestrator = Orchestrator::new(
        state,
        executor,
        Arc::new(mock),
        sink.clone(),
        OrchestratorSection::default(),
    );
    (orchestrator, sink)
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_until_success() {
    let wearable = Wearable::new(true, 2);
    let (orchestrator, sink) = orchestrator(wearable.clone(), tools_section(2, 5));

    let response = orchestrator.handle_turn("s-1", "u-1", "sync my watch").await;
    assert_eq!(wearable.calls.load(Ordering::SeqCst), 3);
    assert_eq!(response.tool_calls.len(), 1);
    assert!(response.tool_calls[0].success);
    assert_eq!(response.tool_calls[0].retry_count, 2);
    assert!((response.confidence - 0.8).abs() < 1e-9);
    assert_eq!(sink.named("tool_retry").len(), 2);
    assert_eq!(sink.named("tool_succeeded").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_failure_with_zero_confidence() {
    let wearable = Wearable::new(false, 0);
    let (orchestrator, _) = orchestrator(wearable.clone(), tools_section(2, 5));

    let response = orchestrator.handle_turn("s-1", "u-1", "sync my watch").await;
    assert_eq!(wearable.calls.load(Ordering::SeqCst), 3);
    assert!(!response.tool_calls[0].success);
    assert_eq!(response.tool_calls[0].error_kind.as_deref(), Some("network"));
    assert_eq!(response.confidence, 0.0);
    assert!(!response.message.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_after_reset_timeout() {
    let wearable = Wearable::new(false, 0);
    let (orchestrator, sink) = orchestrator(wearable.clone(), tools_section(0, 2));

    for _ in 0..2 {
        orchestrator.handle_turn("s-1", "u-1", "sync my watch").await;
    }
    assert_eq!(
        orchestrator.executor().circuit_state("sync_wearable"),
        Some(CircuitState::Open)
    );

    // 熔断期间不再调用工具
    let rejected = orchestrator.handle_turn("s-1", "u-1", "sync my watch").await;
    assert_eq!(rejected.tool_calls[0].error_kind.as_deref(), Some("circuit_open"));
    assert_eq!(wearable.calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    wearable.healthy.store(true, Ordering::SeqCst);

    let probe = orchestrator.handle_turn("s-1", "u-1", "sync my watch").await;
    assert!(probe.tool_calls[0].success);
    assert_eq!(
        orchestrator.executor().circuit_state("sync_wearable"),
        Some(CircuitState::Closed)
    );
    assert_eq!(sink.named("circuit_transition").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_dependency_skips_downstream_step() {
    let wearable = Wearable::new(true, 0);
    let (orchestrator, _) = orchestrator(wearable, tools_section(2, 5));

    let response = orchestrator
        .handle_turn("s-1", "u-1", "weekly check-in please")
        .await;
    assert_eq!(response.intent, "weekly_checkin");
    assert_eq!(response.tool_calls.len(), 2);
    assert!(response.tool_calls[0].success);
    assert!(!response.tool_calls[1].success);
    assert_eq!(response.tool_calls[1].retry_count, 0);
    // 三步中只有一步成功（置信度 0.8）
    assert!((response.confidence - 0.8 / 3.0).abs() < 1e-9);

    let task = orchestrator
        .state_manager()
        .active_task("s-1")
        .await
        .unwrap()
        .unwrap();
    assert!(task.is_terminal());
    let statuses: Vec<StepStatus> = task.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Completed, StepStatus::Failed, StepStatus::Failed]
    );
    assert!(task.steps[2].error.as_deref().unwrap().starts_with("skipped"));
}
