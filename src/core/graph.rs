//! 执行图：PARSE → ROUTE → 并行数据源节点 → SYNTHESIZE → DONE
//!
//! 数据源节点在各自的 tokio 任务中运行，只通过 mpsc 向扇入循环报告；
//! OrchestratorState 与事件流只由扇入循环写入（单写者）。失败的尝试携带 oneshot
//! 回传通道，扇入循环完成分类、决策与状态合并后才把策略交还节点，
//! 因此同一节点的尝试严格串行，退避等待只挂起该节点自身。
//!
//! 扇入条件：所有节点到达终态，或预算截止，或出现 CRITICAL 错误（先到者为准）。
//! 提前扇入时取消查询 token 并终止剩余任务，此后到达的结果只计入 Metrics。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::{
    route, BudgetStatus, BudgetTracker, ErrorClassifier, ErrorRecord, Frame, NodeResult, OrchestratorError,
    OrchestratorState, QuerySupervisor, RecoveryAction, RecoveryStrategist, RecoveryStrategy, Severity, SourceScheduler, StateUpdate,
};
use crate::events::{EventEmitter, EventKind, PartialResultsStatus, RecoveryStatus};
use crate::observability::Metrics;
use crate::sources::{SourceKind, SourceNode, SourceRegistry};
use crate::synthesis::{SynthesisOutput, Synthesizer};

/// 节点任务 → 扇入循环
#[derive(Debug)]
enum NodeMessage {
    Started {
        kind: SourceKind,
        attempt: u32,
    },
    Finished {
        kind: SourceKind,
        result: NodeResult,
        /// 仅失败时携带：扇入循环据此回传恢复策略
        reply: Option<oneshot::Sender<RecoveryStrategy>>,
    },
}

/// 扇入原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FanIn {
    AllSettled,
    BudgetExhausted,
    Critical { node: String, message: String },
}

/// 查询的最终结局
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Completed,
    Failed { reason: String },
}

/// 一次查询执行的完整产出
#[derive(Debug, Clone)]
pub struct QueryRun {
    pub state: OrchestratorState,
    pub synthesis: Option<SynthesisOutput>,
    pub outcome: QueryOutcome,
    pub fan_in: FanIn,
    pub budget: BudgetStatus,
}

impl QueryRun {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Failed { .. })
    }
}

/// 执行图（由 GraphBuilder 构造，可跨查询复用）
pub struct ExecutionGraph {
    config: OrchestratorConfig,
    registry: SourceRegistry,
    classifier: Arc<ErrorClassifier>,
    strategist: RecoveryStrategist,
    synthesizer: Synthesizer,
    metrics: Arc<Metrics>,
    parent_token: Option<CancellationToken>,
}

impl ExecutionGraph {
    pub(crate) fn new(
        config: OrchestratorConfig,
        registry: SourceRegistry,
        classifier: ErrorClassifier,
        synthesizer: Synthesizer,
        metrics: Arc<Metrics>,
        parent_token: Option<CancellationToken>,
    ) -> Self {
        let strategist = RecoveryStrategist::from_config(&config.recovery);
        Self {
            config,
            registry,
            classifier: Arc::new(classifier),
            strategist,
            synthesizer,
            metrics,
            parent_token,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// 不推送事件地执行一次查询，返回最终状态
    pub async fn execute(&self, query: &str, frame: Frame) -> OrchestratorState {
        let emitter = EventEmitter::disabled(uuid::Uuid::new_v4().to_string());
        self.execute_with_events(query, frame, &emitter).await.state
    }

    /// 执行一次查询并把状态转移发射到 emitter
    pub async fn execute_with_events(&self, query: &str, frame: Frame, emitter: &EventEmitter) -> QueryRun {
        let middleware = &self.config.middleware;
        self.metrics.query_started();
        tracing::info!(query_id = %emitter.query_id(), query = %query, "query started");

        emitter.emit(EventKind::Connected {
            query_id: emitter.query_id().to_string(),
            capabilities: self.capabilities(),
        });

        // PARSE
        let frame = self.normalize_frame(frame);
        let mut state = OrchestratorState::new(emitter.query_id(), query, frame.clone());
        state.apply(StateUpdate::new().marker("parse").message(format!(
            "frame: intent {:?}, {} entities, budget {}ms",
            frame.intent,
            frame.entities.len(),
            frame.time_budget_ms
        )));

        let budget = Arc::new(BudgetTracker::new().with_danger_zone(self.config.budget.danger_zone_ratio));
        budget.allocate(frame.time_budget_ms);
        emitter.emit(EventKind::MiddlewareStatus {
            budget: middleware.budget_enforcement.then(|| budget.status()),
            error_recovery: Some(self.recovery_status(0)),
            partial_results: None,
        });

        // ROUTE
        let decision = route(&frame);
        let routed = decision.sources.clone();
        let mut route_update = StateUpdate::new().marker("route").message(decision.reason.clone());
        route_update.routing_decision = Some(decision);
        state.apply(route_update);

        // FAN-OUT
        let supervisor = match &self.parent_token {
            Some(parent) => QuerySupervisor::with_parent(parent),
            None => QuerySupervisor::new(),
        };
        let scheduler = SourceScheduler::new(self.config.graph.max_parallel_sources);
        let shared_frame = Arc::new(frame);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for kind in &routed {
            let Some(client) = self.registry.get(*kind) else {
                state.apply(
                    StateUpdate::new()
                        .marker(format!("{}:skipped", kind.node_name()))
                        .message(format!("{} is not registered, skipped", kind.label())),
                );
                emitter.emit(progress(*kind, "skipped", 100));
                continue;
            };
            pending.insert(*kind);
            emitter.emit(progress(*kind, "queued", 0));
            tasks.spawn(run_node(
                SourceNode::new(client),
                Arc::clone(&shared_frame),
                scheduler.clone(),
                supervisor.child_token(),
                Arc::clone(&budget),
                Arc::clone(&self.metrics),
                tx.clone(),
            ));
        }
        drop(tx);

        // FAN-IN
        let fan_in = self
            .fan_in(&mut state, &mut rx, &mut pending, &budget, emitter)
            .await;

        supervisor.cancel();
        for kind in &pending {
            state.apply(
                StateUpdate::new()
                    .marker(format!("{}:cancelled", kind.node_name()))
                    .message(format!("{} cancelled at fan-in", kind.label())),
            );
            emitter.emit(progress(*kind, "cancelled", 100));
        }
        tasks.shutdown().await;
        while let Ok(message) = rx.try_recv() {
            if let NodeMessage::Finished { kind, .. } = message {
                tracing::debug!(node = kind.node_name(), "late result discarded");
                self.metrics.late_result_discarded();
            }
        }

        let budget_status = budget.sync_clock();
        if fan_in == FanIn::BudgetExhausted {
            self.metrics.budget_exhausted();
            if middleware.budget_enforcement {
                emitter.budget_warning(&budget_status);
            }
        }
        self.report_middleware(&state, &routed, &fan_in, &budget_status, emitter);

        // SYNTHESIZE
        state.apply(StateUpdate::new().marker("synthesize"));
        let synthesis = self.synthesizer.synthesize_with(&state, |stage, pct| {
            emitter.emit(EventKind::SynthesisProgress {
                stage: stage.to_string(),
                progress_percent: pct,
            });
        });

        let error_count = state.errors.len();
        let (synthesis, outcome) = match synthesis {
            Ok(output) => {
                state.answer = Some(output.answer.clone());
                state.checkpoint_id = Some(output.checkpoint_id.clone());
                emitter.emit(EventKind::SynthesisCompleted {
                    checkpoint_id: output.checkpoint_id.clone(),
                    metrics: output.synthesis_metrics.clone(),
                    answer: output.answer.clone(),
                });
                let outcome = match &fan_in {
                    FanIn::Critical { node, message } => QueryOutcome::Failed {
                        reason: OrchestratorError::CriticalFailure {
                            node: node.clone(),
                            message: message.clone(),
                        }
                        .to_string(),
                    },
                    _ => QueryOutcome::Completed,
                };
                if outcome == QueryOutcome::Completed {
                    emitter.emit(EventKind::QueryCompleted {
                        answer_type: output.synthesis_metrics.answer_type.to_string(),
                        checkpoint_id: Some(output.checkpoint_id.clone()),
                        error_count,
                    });
                }
                (Some(output), outcome)
            }
            Err(e) => {
                tracing::error!(query_id = %emitter.query_id(), error = %e, "synthesis failed");
                state.apply(StateUpdate::new().message(e.to_string()));
                (None, QueryOutcome::Failed { reason: e.to_string() })
            }
        };

        match &outcome {
            QueryOutcome::Completed => {
                self.metrics.query_completed();
                tracing::info!(
                    query_id = %emitter.query_id(),
                    errors = error_count,
                    elapsed_ms = budget_status.consumed_ms,
                    "query completed"
                );
            }
            QueryOutcome::Failed { reason } => {
                self.metrics.query_failed();
                emitter.emit(EventKind::QueryFailed {
                    reason: reason.clone(),
                    error_count,
                });
                tracing::warn!(query_id = %emitter.query_id(), reason = %reason, "query failed");
            }
        }

        QueryRun {
            state,
            synthesis,
            outcome,
            fan_in,
            budget: budget_status,
        }
    }

    /// 扇入循环：唯一修改 state 的地方
    async fn fan_in(
        &self,
        state: &mut OrchestratorState,
        rx: &mut mpsc::UnboundedReceiver<NodeMessage>,
        pending: &mut BTreeSet<SourceKind>,
        budget: &BudgetTracker,
        emitter: &EventEmitter,
    ) -> FanIn {
        let enforce = self.config.middleware.budget_enforcement;
        let deadline = tokio::time::sleep_until(budget.deadline());
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.budget.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if pending.is_empty() {
                return FanIn::AllSettled;
            }
            tokio::select! {
                biased;
                message = rx.recv() => {
                    let Some(message) = message else {
                        return FanIn::AllSettled;
                    };
                    self.check_budget(budget, emitter);
                    if let Some(critical) = self.handle(state, message, pending, budget, emitter) {
                        return critical;
                    }
                }
                _ = &mut deadline, if enforce => {
                    tracing::warn!(
                        query_id = %emitter.query_id(),
                        in_flight = pending.len(),
                        "budget exhausted, forcing fan-in"
                    );
                    return FanIn::BudgetExhausted;
                }
                _ = ticker.tick() => {
                    self.check_budget(budget, emitter);
                }
            }
        }
    }

    fn check_budget(&self, budget: &BudgetTracker, emitter: &EventEmitter) {
        let status = budget.sync_clock();
        if self.config.middleware.budget_enforcement
            && status.utilization >= budget.danger_zone()
            && emitter.budget_warning(&status)
        {
            tracing::warn!(
                query_id = %emitter.query_id(),
                utilization = status.utilization,
                remaining_ms = status.remaining_ms,
                "budget danger zone"
            );
        }
    }

    /// 合并一条节点消息；返回 Some 表示出现 CRITICAL 错误需立即扇入
    fn handle(
        &self,
        state: &mut OrchestratorState,
        message: NodeMessage,
        pending: &mut BTreeSet<SourceKind>,
        budget: &BudgetTracker,
        emitter: &EventEmitter,
    ) -> Option<FanIn> {
        let (kind, result, reply) = match message {
            NodeMessage::Started { kind, attempt } => {
                let status = if attempt > 1 { "retrying" } else { "searching" };
                emitter.emit(progress(kind, status, 10));
                return None;
            }
            NodeMessage::Finished { kind, result, reply } => (kind, result, reply),
        };
        self.metrics.node_attempt(result.cache_hit);

        if result.success {
            pending.remove(&kind);
            state.apply(StateUpdate::from_node_result(kind, result));
            emitter.emit(progress(kind, "completed", 100));
            return None;
        }

        let node = result.node.clone();
        let attempt = result.attempt_number;
        let message = result.error_message.clone().unwrap_or_else(|| "unknown error".to_string());
        let classified = self.classifier.classify(&message);
        let max_attempts = self.max_attempts();
        let remaining_ms = self
            .config
            .middleware
            .budget_enforcement
            .then(|| budget.status().remaining_ms);
        let strategy = self.strategist.decide_within(&classified, attempt, max_attempts, remaining_ms);

        tracing::warn!(
            node = %node,
            attempt,
            error_type = %classified.error_type,
            action = %strategy.action,
            "recovery decision"
        );

        let record = ErrorRecord {
            node: node.clone(),
            error: message.clone(),
            timestamp: chrono::Utc::now(),
            strategy: strategy.action,
            reason: strategy.reason.clone(),
            error_type: classified.error_type,
            severity: classified.severity,
            attempt,
        };
        state.apply(
            StateUpdate::from_node_result(kind, result)
                .marker(strategy.action.marker())
                .error(record),
        );

        if strategy.action == RecoveryAction::RetryWithBackoff {
            self.metrics.retry();
            emitter.emit(EventKind::RetryAttempt {
                node,
                attempt: attempt + 1,
                max_attempts,
                delay_ms: strategy.delay_ms(),
                error: message,
            });
            if let Some(reply) = reply {
                let _ = reply.send(strategy);
            }
            return None;
        }

        pending.remove(&kind);
        let status = match strategy.action {
            RecoveryAction::SkipAndContinue => "skipped",
            RecoveryAction::PartialResults => "partial",
            _ => "failed",
        };
        emitter.emit(progress(kind, status, 100));
        if let Some(reply) = reply {
            let _ = reply.send(strategy);
        }

        (classified.severity == Severity::Critical).then(|| FanIn::Critical { node, message })
    }

    fn report_middleware(
        &self,
        state: &OrchestratorState,
        routed: &[SourceKind],
        fan_in: &FanIn,
        budget: &BudgetStatus,
        emitter: &EventEmitter,
    ) {
        let middleware = &self.config.middleware;
        let available = state.available_sources();
        let available_tags: Vec<String> = available.iter().map(|k| k.tag().to_string()).collect();
        let missing_tags: Vec<String> = routed
            .iter()
            .filter(|k| !available.contains(k))
            .map(|k| k.tag().to_string())
            .collect();

        emitter.emit(EventKind::MiddlewareStatus {
            budget: middleware.budget_enforcement.then_some(*budget),
            error_recovery: Some(self.recovery_status(state.errors.len())),
            partial_results: Some(PartialResultsStatus {
                enabled: middleware.partial_results,
                available_sources: available_tags.clone(),
                missing_sources: missing_tags.clone(),
            }),
        });

        if middleware.partial_results && !missing_tags.is_empty() {
            let reason = match fan_in {
                FanIn::BudgetExhausted => "time budget exhausted".to_string(),
                FanIn::Critical { node, .. } => format!("critical error in {node}"),
                FanIn::AllSettled => format!("{} source(s) returned no result", missing_tags.len()),
            };
            let completion_percentage = if routed.is_empty() {
                0
            } else {
                ((available.len() * 100) / routed.len()) as u8
            };
            emitter.emit(EventKind::PartialResults {
                reason,
                completion_percentage,
                available_sources: available_tags,
            });
        }
    }

    fn normalize_frame(&self, mut frame: Frame) -> Frame {
        if frame.time_budget_ms == 0 {
            frame.time_budget_ms = self.config.budget.default_time_budget_ms;
        }
        if frame.filters.limit == 0 {
            frame.filters.limit = self.config.synthesis.default_limit;
        }
        frame
    }

    fn max_attempts(&self) -> u32 {
        if self.config.middleware.error_recovery {
            self.config.recovery.max_attempts.max(1)
        } else {
            1
        }
    }

    fn recovery_status(&self, errors: usize) -> RecoveryStatus {
        RecoveryStatus {
            enabled: self.config.middleware.error_recovery,
            max_attempts: self.max_attempts(),
            errors,
        }
    }

    fn capabilities(&self) -> Vec<String> {
        let middleware = &self.config.middleware;
        let mut caps = vec!["progress".to_string(), "synthesis".to_string()];
        for (enabled, name) in [
            (middleware.budget_enforcement, "budget_enforcement"),
            (middleware.error_recovery, "error_recovery"),
            (middleware.partial_results, "partial_results"),
        ] {
            if enabled {
                caps.push(name.to_string());
            }
        }
        caps
    }
}

fn progress(kind: SourceKind, status: &str, progress_percent: u8) -> EventKind {
    EventKind::Progress {
        source: kind.tag().to_string(),
        status: status.to_string(),
        progress_percent,
    }
}

/// 退避秒数 → 等待时长；负数、NaN 与无法表示的值按 0 处理
fn backoff_sleep(delay_seconds: f64) -> Duration {
    Duration::try_from_secs_f64(delay_seconds).unwrap_or(Duration::ZERO)
}

/// 单个数据源节点的重试循环（在独立任务中运行）
async fn run_node(
    node: SourceNode,
    frame: Arc<Frame>,
    scheduler: SourceScheduler,
    token: CancellationToken,
    budget: Arc<BudgetTracker>,
    metrics: Arc<Metrics>,
    tx: mpsc::UnboundedSender<NodeMessage>,
) {
    let kind = node.kind();
    let Some(_permit) = scheduler.acquire(&token).await else {
        return;
    };
    let mut attempt = 1;
    loop {
        if token.is_cancelled() || tx.send(NodeMessage::Started { kind, attempt }).is_err() {
            return;
        }
        let result = node.run(&frame, attempt).await;
        budget.sync_clock();
        if token.is_cancelled() {
            metrics.late_result_discarded();
            return;
        }

        if result.success {
            let _ = tx.send(NodeMessage::Finished { kind, result, reply: None });
            return;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(NodeMessage::Finished {
                kind,
                result,
                reply: Some(reply_tx),
            })
            .is_err()
        {
            metrics.late_result_discarded();
            return;
        }
        let strategy = tokio::select! {
            _ = token.cancelled() => return,
            reply = reply_rx => match reply {
                Ok(strategy) => strategy,
                Err(_) => return,
            },
        };
        if strategy.action != RecoveryAction::RetryWithBackoff {
            return;
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(backoff_sleep(strategy.delay_seconds)) => {}
        }
        attempt += 1;
    }
}
