//! 推理编排器：一个回合的主流程
//!
//! 记录用户消息 → 若在等待澄清则先尝试解析选项 → 意图分析得到计划 → 建任务并按依赖顺序执行步骤
//! → 汇总置信度 → 让补全服务措辞回复（支持流式与取消）→ 记录助手消息。
//! 同一会话的回合由 SessionSupervisor 串行化。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorSection;
use crate::core::clarification::{ClarificationContext, ClarificationOption};
use crate::core::planner::{self, IntentAnalysis, PlannedStep};
use crate::core::recovery::{RecoveryAction, TurnStage, UNRECOVERABLE_CONFIDENCE};
use crate::core::{prompts, CoachError, CompletionError, PlanningError, RecoveryEngine, SessionSupervisor};
use crate::llm::{complete_streaming, CompletionService, StreamedText};
use crate::memory::{ConversationStateManager, DialogueState, Message, StepPatch};
use crate::observability::{CoachEvent, EventSink};
use crate::tools::params::MODIFY_WORKOUT;
use crate::tools::{tool_call_schema_json, ToolContext, ToolExecutor, ToolResult};

/// 澄清未命中时的意图名
pub const CLARIFICATION_MISMATCH: &str = "clarification_mismatch";

/// 本回合的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub step: String,
    pub tool: String,
    pub success: bool,
    pub fallback_used: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResponse {
    pub message: String,
    pub confidence: f64,
    pub tool_calls: Vec<ToolCallRecord>,
    pub intent: String,
    pub dialogue: DialogueState,
    pub cancelled: bool,
}

impl TurnResponse {
    pub fn awaiting_clarification(&self) -> bool {
        self.dialogue.is_awaiting()
    }
}

/// 回复的产出方式
enum ReplyMode<'a> {
    Complete,
    Stream {
        on_chunk: &'a mut (dyn FnMut(&str) + Send),
        cancel: CancellationToken,
    },
}

impl ReplyMode<'_> {
    fn is_cancelled(&self) -> bool {
        match self {
            ReplyMode::Complete => false,
            ReplyMode::Stream { cancel, .. } => cancel.is_cancelled(),
        }
    }

    /// 非补全产生的固定消息，流式模式下整段推送一次
    fn emit_whole(&mut self, text: &str) {
        if let ReplyMode::Stream { on_chunk, .. } = self {
            on_chunk(text);
        }
    }
}

/// 计划执行结果
#[derive(Debug, Default)]
struct PlanOutcome {
    tool_calls: Vec<ToolCallRecord>,
    summaries: Vec<String>,
    confidence: f64,
    /// 最后一个成功工具给出的 message
    last_message: Option<String>,
    all_failed: bool,
}

pub struct Orchestrator {
    state: Arc<ConversationStateManager>,
    executor: Arc<ToolExecutor>,
    completion: Arc<dyn CompletionService>,
    supervisor: SessionSupervisor,
    recovery: RecoveryEngine,
    events: Arc<dyn EventSink>,
    config: OrchestratorSection,
    tool_schema: String,
}

impl Orchestrator {
    pub fn new(
        state: Arc<ConversationStateManager>,
        executor: Arc<ToolExecutor>,
        completion: Arc<dyn CompletionService>,
        events: Arc<dyn EventSink>,
        config: OrchestratorSection,
    ) -> Self {
        Self {
            state,
            executor,
            completion,
            supervisor: SessionSupervisor::new(),
            recovery: RecoveryEngine::new(),
            events,
            config,
            tool_schema: tool_call_schema_json(),
        }
    }

    pub fn state_manager(&self) -> &ConversationStateManager {
        &self.state
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 取消该会话进行中的回合
    pub fn cancel(&self, session_id: &str) -> bool {
        self.supervisor.cancel(session_id)
    }

    pub async fn handle_turn(&self, session_id: &str, user_id: &str, utterance: &str) -> TurnResponse {
        let _permit = self.supervisor.begin_turn(session_id).await;
        self.run_turn(session_id, user_id, utterance, ReplyMode::Complete)
            .await
    }

    /// 流式回合：回复文本按块回调；cancel 或 supervisor 取消后停止，已生成的部分仍记为助手消息
    pub async fn handle_turn_streaming(
        &self,
        session_id: &str,
        user_id: &str,
        utterance: &str,
        on_chunk: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
    ) -> TurnResponse {
        let permit = self.supervisor.begin_turn(session_id).await;
        let merged = permit.cancel_token().child_token();
        let watcher = {
            let caller = cancel.clone();
            let merged = merged.clone();
            tokio::spawn(async move {
                caller.cancelled().await;
                merged.cancel();
            })
        };
        if cancel.is_cancelled() {
            merged.cancel();
        }
        let response = self
            .run_turn(
                session_id,
                user_id,
                utterance,
                ReplyMode::Stream {
                    on_chunk,
                    cancel: merged,
                },
            )
            .await;
        watcher.abort();
        response
    }

    async fn run_turn(
        &self,
        session_id: &str,
        user_id: &str,
        utterance: &str,
        mut mode: ReplyMode<'_>,
    ) -> TurnResponse {
        match self.turn(session_id, user_id, utterance, &mut mode).await {
            Ok(response) => response,
            Err(err) => self.recover(session_id, &err, &mut mode).await,
        }
    }

    /// 计划产生前的失败：固定致歉或（取消时）空回复
    async fn recover(&self, session_id: &str, err: &CoachError, mode: &mut ReplyMode<'_>) -> TurnResponse {
        let dialogue = self
            .state
            .dialogue_state(session_id)
            .await
            .unwrap_or_default();
        match self.recovery.handle(err, TurnStage::Planning) {
            RecoveryAction::KeepPartial => TurnResponse {
                message: String::new(),
                confidence: UNRECOVERABLE_CONFIDENCE,
                tool_calls: Vec::new(),
                intent: String::new(),
                dialogue,
                cancelled: true,
            },
            action => {
                let message = match action {
                    RecoveryAction::Apologize(message) => message,
                    _ => self.recovery.template_reply(&[]),
                };
                mode.emit_whole(&message);
                if let Err(e) = self.state.add_message(session_id, Message::assistant(&message)).await {
                    tracing::warn!(session_id, error = %e, "could not record apology");
                }
                TurnResponse {
                    message,
                    confidence: UNRECOVERABLE_CONFIDENCE,
                    tool_calls: Vec::new(),
                    intent: "error".to_string(),
                    dialogue,
                    cancelled: false,
                }
            }
        }
    }

    async fn turn(
        &self,
        session_id: &str,
        user_id: &str,
        utterance: &str,
        mode: &mut ReplyMode<'_>,
    ) -> Result<TurnResponse, CoachError> {
        self.state.initialize_state(session_id, user_id).await?;
        self.state
            .add_message(session_id, Message::user(utterance))
            .await?;

        if let DialogueState::AwaitingClarification(pending) =
            self.state.dialogue_state(session_id).await?
        {
            if let Some(option) = pending.resolve(utterance) {
                let option = option.clone();
                return self
                    .resolve_clarification(session_id, user_id, utterance, &pending, &option, mode)
                    .await;
            }
            // 未命中选项：只有新的可执行意图才能取代待澄清问题
            match self.analyze(session_id, utterance).await {
                Ok(analysis) if analysis.is_actionable() => {
                    tracing::info!(session_id, intent = %analysis.intent, "pending clarification superseded");
                    self.state.clear_clarification(session_id).await?;
                    return self
                        .execute_intent(session_id, user_id, utterance, analysis, mode)
                        .await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(session_id, error = %e, "intent analysis failed while awaiting clarification"),
            }
            return self.clarification_mismatch(session_id, &pending, mode).await;
        }

        let analysis = self.analyze(session_id, utterance).await?;
        self.execute_intent(session_id, user_id, utterance, analysis, mode)
            .await
    }

    /// 意图分析；计划无法解析时换成默认计划
    async fn analyze(&self, session_id: &str, utterance: &str) -> Result<IntentAnalysis, CoachError> {
        let context = self.state.get_context_for_ai(session_id).await?;
        let prompt = prompts::intent_prompt(
            &context,
            &self.executor.tool_descriptions(),
            &self.tool_schema,
            &self.executor.extension_schemas(),
            utterance,
        );
        let raw = self.completion.complete(&prompt).await?;
        Ok(
            match planner::parse_intent(&raw, self.config.max_plan_steps) {
                Ok(analysis) => analysis,
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "unparsable plan, using default plan");
                    IntentAnalysis::default_plan()
                }
            },
        )
    }

    async fn execute_intent(
        &self,
        session_id: &str,
        user_id: &str,
        utterance: &str,
        analysis: IntentAnalysis,
        mode: &mut ReplyMode<'_>,
    ) -> Result<TurnResponse, CoachError> {
        if analysis.needs_field_clarification() {
            return self.request_clarification(session_id, &analysis, mode).await;
        }

        let steps = plan_steps(&analysis);
        if steps.is_empty() {
            let (message, cancelled) = self
                .compose_reply(session_id, &analysis.intent, &[], utterance, mode)
                .await?;
            return self
                .finish(
                    session_id,
                    &analysis.intent,
                    message,
                    self.config.conversational_confidence,
                    Vec::new(),
                    cancelled,
                )
                .await;
        }

        if mode.is_cancelled() {
            return Err(CoachError::Cancelled);
        }
        let ctx = ToolContext::new(session_id, user_id)
            .with_utterance(utterance)
            .with_entities(Value::Object(analysis.entities.clone()));
        let outcome = self
            .run_plan(session_id, &analysis.intent, &steps, ctx)
            .await?;

        let (message, cancelled) = self
            .compose_reply(session_id, &analysis.intent, &outcome.summaries, utterance, mode)
            .await?;
        self.finish(
            session_id,
            &analysis.intent,
            message,
            outcome.confidence,
            outcome.tool_calls,
            cancelled,
        )
        .await
    }

    async fn request_clarification(
        &self,
        session_id: &str,
        analysis: &IntentAnalysis,
        mode: &mut ReplyMode<'_>,
    ) -> Result<TurnResponse, CoachError> {
        let Some(modification) = analysis.modification.as_ref() else {
            return Err(CoachError::Planning(PlanningError(
                "clarification without modification".into(),
            )));
        };
        let context = ClarificationContext::for_unspecified_field(
            &analysis.intent,
            MODIFY_WORKOUT,
            modification.base_args(),
            modification.operation,
            modification.amount,
        );
        let message = context.prompt();
        self.state
            .set_clarification(session_id, context.clone())
            .await?;
        self.events.emit(CoachEvent::ClarificationRequested {
            session_id: session_id.to_string(),
            intent: analysis.intent.clone(),
        });
        mode.emit_whole(&message);
        self.state
            .add_message(session_id, Message::assistant(&message))
            .await?;
        Ok(TurnResponse {
            message,
            confidence: analysis.confidence,
            tool_calls: Vec::new(),
            intent: analysis.intent.clone(),
            dialogue: DialogueState::AwaitingClarification(context),
            cancelled: false,
        })
    }

    async fn clarification_mismatch(
        &self,
        session_id: &str,
        pending: &ClarificationContext,
        mode: &mut ReplyMode<'_>,
    ) -> Result<TurnResponse, CoachError> {
        self.events.emit(CoachEvent::ClarificationMismatch {
            session_id: session_id.to_string(),
        });
        let message = pending.mismatch_prompt();
        mode.emit_whole(&message);
        self.state
            .add_message(session_id, Message::assistant(&message))
            .await?;
        Ok(TurnResponse {
            message,
            confidence: self.config.conversational_confidence,
            tool_calls: Vec::new(),
            intent: CLARIFICATION_MISMATCH.to_string(),
            dialogue: DialogueState::AwaitingClarification(pending.clone()),
            cancelled: false,
        })
    }

    /// 选项命中：清除澄清上下文，执行合并后的工具调用，直接返回工具给出的结果消息
    async fn resolve_clarification(
        &self,
        session_id: &str,
        user_id: &str,
        utterance: &str,
        pending: &ClarificationContext,
        option: &ClarificationOption,
        mode: &mut ReplyMode<'_>,
    ) -> Result<TurnResponse, CoachError> {
        self.state.clear_clarification(session_id).await?;
        self.events.emit(CoachEvent::ClarificationResolved {
            session_id: session_id.to_string(),
            option: option.label.clone(),
        });

        let Some(call) = pending.resolved_call(option) else {
            return Err(CoachError::Planning(PlanningError(
                "clarification context has no tool call".into(),
            )));
        };
        let mut args = serde_json::Map::new();
        args.insert(call.tool.clone(), call.args);
        let step = PlannedStep {
            name: format!("apply_{}", option.label),
            description: pending.clarification_question.clone(),
            tools: vec![call.tool],
            dependencies: Vec::new(),
            args,
        };
        let ctx = ToolContext::new(session_id, user_id).with_utterance(utterance);
        let outcome = self
            .run_plan(session_id, &pending.original_intent_name, &[step], ctx)
            .await?;

        let message = match (&outcome.last_message, outcome.all_failed) {
            (Some(m), false) => m.clone(),
            _ => "Sorry, I couldn't make that change to your workout.".to_string(),
        };
        mode.emit_whole(&message);
        self.finish(
            session_id,
            &pending.original_intent_name,
            message,
            outcome.confidence,
            outcome.tool_calls,
            false,
        )
        .await
    }

    /// 建任务并按顺序执行步骤；依赖失败的步骤直接标记为跳过
    async fn run_plan(
        &self,
        session_id: &str,
        task_type: &str,
        steps: &[PlannedStep],
        mut ctx: ToolContext,
    ) -> Result<PlanOutcome, CoachError> {
        if let Some(stale) = self
            .state
            .active_task(session_id)
            .await?
            .filter(|t| !t.is_terminal())
        {
            tracing::warn!(session_id, task_id = %stale.task_id, "abandoning unfinished task");
            self.state.finish_task(session_id, "superseded").await?;
        }
        let specs = steps.iter().map(PlannedStep::spec).collect();
        let task_id = self.state.start_task(session_id, task_type, specs).await?;
        tracing::debug!(session_id, %task_id, steps = steps.len(), "task started");

        let mut outcome = PlanOutcome::default();
        let mut succeeded: HashMap<&str, bool> = HashMap::new();
        let mut step_confidences = Vec::new();

        for (idx, step) in steps.iter().enumerate() {
            let step_id = format!("step-{}", idx + 1);
            if let Some(dep) = step
                .dependencies
                .iter()
                .find(|d| !succeeded.get(d.as_str()).copied().unwrap_or(false))
            {
                let reason = format!("skipped: dependency '{dep}' failed");
                self.state
                    .update_task_step(session_id, &step_id, StepPatch::failed(&reason))
                    .await?;
                outcome.summaries.push(format!("{}: skipped", step.name));
                succeeded.insert(&step.name, false);
                continue;
            }

            self.state
                .update_task_step(session_id, &step_id, StepPatch::in_progress())
                .await?;

            let mut outputs = Vec::new();
            let mut confidences = Vec::new();
            let mut failure: Option<String> = None;
            for tool in &step.tools {
                let result = self
                    .executor
                    .execute_tool(tool, step.args_for(tool), &ctx)
                    .await;
                outcome.tool_calls.push(record(&step.name, tool, &result));
                let summary = summarize(tool, &result);
                self.state
                    .add_message(
                        session_id,
                        Message::tool_result(
                            tool,
                            result.is_success(),
                            &summary,
                            result.data().cloned().unwrap_or(Value::Null),
                        ),
                    )
                    .await?;
                outcome.summaries.push(summary);
                match result.into_result() {
                    Ok(data) => {
                        confidences.push(data.get("confidence").and_then(Value::as_f64).unwrap_or(1.0));
                        if let Some(m) = data.get("message").and_then(Value::as_str) {
                            outcome.last_message = Some(m.to_string());
                        }
                        outputs.push(data);
                    }
                    Err(e) => {
                        failure = Some(format!("{tool}: {}", e.kind().as_str()));
                        break;
                    }
                }
            }

            match failure {
                Some(reason) => {
                    self.state
                        .update_task_step(session_id, &step_id, StepPatch::failed(reason))
                        .await?;
                    succeeded.insert(&step.name, false);
                }
                None => {
                    let output = match outputs.len() {
                        0 => json!({ "description": step.description }),
                        1 => outputs.remove(0),
                        _ => Value::Array(outputs),
                    };
                    self.state
                        .update_task_step(session_id, &step_id, StepPatch::completed(output.clone()))
                        .await?;
                    ctx.prior_outputs.push((step.name.clone(), output));
                    step_confidences.push(mean(&confidences).unwrap_or(1.0));
                    succeeded.insert(&step.name, true);
                }
            }
        }

        let total = steps.len() as f64;
        let ok = step_confidences.len() as f64;
        outcome.confidence = mean(&step_confidences).map(|m| m * ok / total).unwrap_or(0.0);
        outcome.all_failed = step_confidences.is_empty();
        Ok(outcome)
    }

    /// 请补全服务措辞回复；失败时退化为模板回复，流式取消时返回已生成部分。
    /// 流式回复中途出错时，在已展示的部分之后接上模板回复，记录的内容与展示的一致。
    async fn compose_reply(
        &self,
        session_id: &str,
        intent: &str,
        summaries: &[String],
        utterance: &str,
        mode: &mut ReplyMode<'_>,
    ) -> Result<(String, bool), CoachError> {
        let context = self.state.get_context_for_ai(session_id).await?;
        let prompt = prompts::reply_prompt(&context, intent, summaries, utterance);
        let result = match mode {
            ReplyMode::Complete => self
                .completion
                .complete(&prompt)
                .await
                .map(|text| StreamedText {
                    text,
                    cancelled: false,
                    error: None,
                }),
            ReplyMode::Stream { on_chunk, cancel } => {
                complete_streaming(self.completion.as_ref(), &prompt, &mut **on_chunk, cancel).await
            }
        };
        let fallback = match result {
            Ok(StreamedText {
                text,
                cancelled: true,
                ..
            }) => return Ok((text, true)),
            Ok(StreamedText {
                text,
                error: Some(e),
                ..
            }) => {
                tracing::warn!(session_id, error = %e, "reply stream broke off after partial output");
                let tail = format!("\n\n{}", self.reply_fallback(e, summaries));
                mode.emit_whole(&tail);
                return Ok((format!("{text}{tail}"), false));
            }
            Ok(StreamedText { text, .. }) if !text.trim().is_empty() => return Ok((text, false)),
            Ok(_) => self.recovery.template_reply(summaries),
            Err(e) => self.reply_fallback(e, summaries),
        };
        mode.emit_whole(&fallback);
        Ok((fallback, false))
    }

    fn reply_fallback(&self, err: CompletionError, summaries: &[String]) -> String {
        match self.recovery.handle(&CoachError::from(err), TurnStage::Reply) {
            RecoveryAction::Apologize(message) => message,
            _ => self.recovery.template_reply(summaries),
        }
    }

    async fn finish(
        &self,
        session_id: &str,
        intent: &str,
        message: String,
        confidence: f64,
        tool_calls: Vec<ToolCallRecord>,
        cancelled: bool,
    ) -> Result<TurnResponse, CoachError> {
        if !(cancelled && message.is_empty()) {
            self.state
                .add_message(session_id, Message::assistant(&message))
                .await?;
        }
        let confidence = confidence.clamp(0.0, 1.0);
        self.events.emit(CoachEvent::TurnCompleted {
            session_id: session_id.to_string(),
            intent: intent.to_string(),
            confidence,
            tool_calls: tool_calls.len(),
        });
        Ok(TurnResponse {
            message,
            confidence,
            tool_calls,
            intent: intent.to_string(),
            dialogue: self.state.dialogue_state(session_id).await?,
            cancelled,
        })
    }
}

/// 计划步骤；没有步骤但修改请求完整时合成一个修改步骤
fn plan_steps(analysis: &IntentAnalysis) -> Vec<PlannedStep> {
    if !analysis.steps.is_empty() {
        return analysis.steps.clone();
    }
    let Some(m) = analysis.modification.as_ref() else {
        return Vec::new();
    };
    let Some(field) = m.field else {
        return Vec::new();
    };
    let mut args = m.base_args();
    args.insert("field".into(), json!(field));
    let mut step_args = serde_json::Map::new();
    step_args.insert(MODIFY_WORKOUT.to_string(), Value::Object(args));
    vec![PlannedStep {
        name: "apply_modification".to_string(),
        description: format!("{} {}", field.as_str(), analysis.intent),
        tools: vec![MODIFY_WORKOUT.to_string()],
        dependencies: Vec::new(),
        args: step_args,
    }]
}

fn record(step: &str, tool: &str, result: &ToolResult) -> ToolCallRecord {
    ToolCallRecord {
        step: step.to_string(),
        tool: tool.to_string(),
        success: result.is_success(),
        fallback_used: result.metadata.fallback_used,
        retry_count: result.metadata.retry_count,
        error_kind: result.error().map(|e| e.kind().as_str().to_string()),
    }
}

/// 面向回复措辞的单行结果摘要（不含内部错误细节）
fn summarize(tool: &str, result: &ToolResult) -> String {
    match (result.message(), result.error()) {
        (Some(m), _) => format!("{tool}: {m}"),
        (None, None) => format!("{tool}: done"),
        (None, Some(_)) => format!("{tool}: could not be completed"),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
