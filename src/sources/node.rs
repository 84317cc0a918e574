//! 数据源节点
//!
//! 包装一个 SourceClient：执行一次检索，记录耗时 / 缓存命中 / 尝试序号，
//! 产出 NodeResult；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;

use tokio::time::Instant;

use crate::core::{Frame, NodeResult};
use crate::sources::{SourceClient, SourceKind};

/// 单个数据源的节点适配器
#[derive(Clone)]
pub struct SourceNode {
    client: Arc<dyn SourceClient>,
}

impl SourceNode {
    pub fn new(client: Arc<dyn SourceClient>) -> Self {
        Self { client }
    }

    pub fn kind(&self) -> SourceKind {
        self.client.kind()
    }

    pub fn name(&self) -> &'static str {
        self.client.kind().node_name()
    }

    /// 执行第 attempt 次检索；错误不抛出，统一转为失败的 NodeResult
    pub async fn run(&self, frame: &Frame, attempt: u32) -> NodeResult {
        let start = Instant::now();
        let limit = frame.filters.limit;
        let result = self.client.search(frame, &frame.filters, limit).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (ok, outcome, cache_hit, items) = match &result {
            Ok(r) => (true, "ok", r.cache_hit, r.items.len()),
            Err(_) => (false, "error", false, 0),
        };
        let audit = serde_json::json!({
            "event": "source_audit",
            "node": self.name(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "attempt": attempt,
            "cache_hit": cache_hit,
            "items": items,
        });
        tracing::debug!(audit = %audit.to_string(), "source");

        match result {
            Ok(data) => NodeResult::ok(self.name(), data, duration_ms, attempt),
            Err(e) => NodeResult::failed(self.name(), e, duration_ms, attempt),
        }
    }
}
