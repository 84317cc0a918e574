//! 编排事件：将执行图 / 中间件 / 综合阶段的状态转移翻译为有序事件流
//!
//! 每个事件带 query_id、递增序号与单调不减的 RFC3339 时间戳。发射器从不重排或丢弃事件；
//! 同一数据源在合并窗口内紧邻的相同 progress 会被合并（中间出现任何非 progress 事件则不合并）。
//! budget_warning 每个查询至多一次。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::BudgetStatus;
use crate::synthesis::SynthesisMetrics;

/// 错误恢复中间件状态
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatus {
    pub enabled: bool,
    pub max_attempts: u32,
    pub errors: usize,
}

/// 部分结果中间件状态
#[derive(Debug, Clone, Serialize)]
pub struct PartialResultsStatus {
    pub enabled: bool,
    pub available_sources: Vec<String>,
    pub missing_sources: Vec<String>,
}

/// 事件负载
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Connected {
        query_id: String,
        capabilities: Vec<String>,
    },
    Progress {
        source: String,
        status: String,
        progress_percent: u8,
    },
    MiddlewareStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        budget: Option<BudgetStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_recovery: Option<RecoveryStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_results: Option<PartialResultsStatus>,
    },
    RetryAttempt {
        node: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    PartialResults {
        reason: String,
        completion_percentage: u8,
        available_sources: Vec<String>,
    },
    BudgetWarning {
        utilization: f64,
        remaining_ms: u64,
    },
    SynthesisProgress {
        stage: String,
        progress_percent: u8,
    },
    SynthesisCompleted {
        checkpoint_id: String,
        metrics: SynthesisMetrics,
        answer: String,
    },
    QueryCompleted {
        answer_type: String,
        checkpoint_id: Option<String>,
        error_count: usize,
    },
    QueryFailed {
        reason: String,
        error_count: usize,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected { .. } => "connected",
            EventKind::Progress { .. } => "progress",
            EventKind::MiddlewareStatus { .. } => "middleware_status",
            EventKind::RetryAttempt { .. } => "retry_attempt",
            EventKind::PartialResults { .. } => "partial_results",
            EventKind::BudgetWarning { .. } => "budget_warning",
            EventKind::SynthesisProgress { .. } => "synthesis_progress",
            EventKind::SynthesisCompleted { .. } => "synthesis_completed",
            EventKind::QueryCompleted { .. } => "query_completed",
            EventKind::QueryFailed { .. } => "query_failed",
        }
    }
}

fn rfc3339<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// 对外事件（可序列化为 JSON 供 SSE 推送）
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorEvent {
    pub query_id: String,
    pub sequence: u64,
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// 相同 progress 的合并窗口
pub const PROGRESS_COALESCE_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct LastProgress {
    status: String,
    percent: u8,
    at: Instant,
}

#[derive(Debug)]
struct EmitterInner {
    sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    last_progress: HashMap<String, LastProgress>,
}

/// 单个查询的事件发射器
#[derive(Debug)]
pub struct EventEmitter {
    query_id: String,
    tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    inner: Mutex<EmitterInner>,
    budget_warned: AtomicBool,
}

impl EventEmitter {
    /// 创建发射器与对应的接收端
    pub fn channel(query_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(query_id.into(), Some(tx)), rx)
    }

    /// 不推送事件（仍维护序号与 budget_warning 状态）
    pub fn disabled(query_id: impl Into<String>) -> Self {
        Self::build(query_id.into(), None)
    }

    fn build(query_id: String, tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>) -> Self {
        Self {
            query_id,
            tx,
            inner: Mutex::new(EmitterInner {
                sequence: 0,
                last_timestamp: None,
                last_progress: HashMap::new(),
            }),
            budget_warned: AtomicBool::new(false),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// 发射一个事件；返回 false 表示被合并（未发送）
    pub fn emit(&self, kind: EventKind) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let EventKind::Progress { source, status, progress_percent } = &kind {
            let now = Instant::now();
            let rapid_repeat = inner.last_progress.get(source).is_some_and(|last| {
                last.status == *status
                    && last.percent == *progress_percent
                    && now.duration_since(last.at) < PROGRESS_COALESCE_WINDOW
            });
            if rapid_repeat {
                return false;
            }
            inner.last_progress.insert(
                source.clone(),
                LastProgress {
                    status: status.clone(),
                    percent: *progress_percent,
                    at: now,
                },
            );
        } else {
            inner.last_progress.clear();
        }

        let now = Utc::now();
        let timestamp = match inner.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        inner.last_timestamp = Some(timestamp);
        inner.sequence += 1;

        let event = OrchestratorEvent {
            query_id: self.query_id.clone(),
            sequence: inner.sequence,
            timestamp,
            kind,
        };
        tracing::trace!(query_id = %self.query_id, event = event.kind.name(), seq = event.sequence, "emit");
        // 锁内发送，保证多线程调用时的顺序与序号一致
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
        true
    }

    /// 首次进入危险区时发射 budget_warning；之后的调用无效果
    pub fn budget_warning(&self, status: &BudgetStatus) -> bool {
        if self.budget_warned.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.emit(EventKind::BudgetWarning {
            utilization: status.utilization,
            remaining_ms: status.remaining_ms,
        })
    }

    pub fn budget_warned(&self) -> bool {
        self.budget_warned.load(Ordering::SeqCst)
    }
}

/// 从接收端取出当前所有已发送的事件（测试与 CLI 使用）
pub fn drain(rx: &mut mpsc::UnboundedReceiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
