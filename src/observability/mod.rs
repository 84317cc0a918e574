//! 可观测性：tracing 初始化与进程级计数器
//!
//! Metrics 由 GraphBuilder 以 Arc 注入，是各查询之间唯一共享的可变状态，全部为原子计数。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装 fmt 层与 EnvFilter（默认 info，可用 RUST_LOG 覆盖）；重复调用无效果
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 进程级计数器
#[derive(Debug, Default)]
pub struct Metrics {
    queries_started: AtomicU64,
    queries_completed: AtomicU64,
    queries_failed: AtomicU64,
    node_attempts: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    budget_exhaustions: AtomicU64,
    late_results_discarded: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_started: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub node_attempts: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub budget_exhaustions: u64,
    pub late_results_discarded: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_completed(&self) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_attempt(&self, cache_hit: bool) {
        self.node_attempts.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn budget_exhausted(&self) {
        self.budget_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// 扇入之后才到达的结果（只计数，不写状态）
    pub fn late_result_discarded(&self) {
        self.late_results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_started: self.queries_started.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            node_attempts: self.node_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            budget_exhaustions: self.budget_exhaustions.load(Ordering::Relaxed),
            late_results_discarded: self.late_results_discarded.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    /// Prometheus 文本格式
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, u64); 8] = [
            ("queries_started_total", "Queries accepted by the orchestrator", s.queries_started),
            ("queries_completed_total", "Queries that emitted query_completed", s.queries_completed),
            ("queries_failed_total", "Queries that emitted query_failed", s.queries_failed),
            ("node_attempts_total", "Source node attempts", s.node_attempts),
            ("retries_total", "Retries scheduled by error recovery", s.retries),
            ("cache_hits_total", "Source node attempts served from cache", s.cache_hits),
            ("budget_exhaustions_total", "Queries forced to fan in by the time budget", s.budget_exhaustions),
            ("late_results_discarded_total", "Node results discarded after fan-in", s.late_results_discarded),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP medquery_{name} {help}\n# TYPE medquery_{name} counter\nmedquery_{name} {value}\n"
            ));
        }
        out
    }
}
