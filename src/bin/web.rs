//! MedQuery Web：以 SSE 推送查询事件流
//!
//! 启动: cargo run --bin medquery-web --features web
//! 监听地址由 MEDQUERY_WEB_ADDR 指定（默认 127.0.0.1:8080）。

#![cfg(feature = "web")]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::mpsc;

use medquery::core::{ExecutionGraph, Filters, Frame, Intent};
use medquery::events::{EventEmitter, OrchestratorEvent};
use medquery::observability::{self, Metrics};
use medquery::sources::demo_registry;
use medquery::{load_config, GraphBuilder};

struct AppState {
    graph: Arc<ExecutionGraph>,
    metrics: Arc<Metrics>,
}

/// POST /api/query/stream 请求体
#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    intent: Option<Intent>,
    #[serde(default)]
    entities: BTreeMap<String, String>,
    #[serde(default)]
    time_budget_ms: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    recency_years: Option<u32>,
}

impl QueryRequest {
    fn frame(&self) -> Frame {
        let mut filters = Filters::default();
        if let Some(limit) = self.limit {
            filters.limit = limit;
        }
        filters.recency_years = self.recency_years;
        let mut frame = Frame::new(self.intent.unwrap_or(Intent::General)).with_filters(filters);
        for (slot, value) in &self.entities {
            frame = frame.with_entity(slot.clone(), value.clone());
        }
        if let Some(ms) = self.time_budget_ms {
            frame = frame.with_time_budget_ms(ms);
        }
        frame
    }
}

fn sse_event(event: &OrchestratorEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::warn!("event serialization failed: {}", e);
        "{}".to_string()
    });
    Event::default()
        .event(event.kind.name())
        .id(event.sequence.to_string())
        .data(data)
}

/// POST /api/query/stream：执行一次查询，按发生顺序推送事件，query_completed / query_failed 后结束
async fn api_query_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query is required".to_string()));
    }
    let frame = req.frame();

    let (emitter, rx) = EventEmitter::channel(uuid::Uuid::new_v4().to_string());
    let graph = Arc::clone(&state.graph);
    tokio::spawn(async move {
        let run = graph.execute_with_events(&query, frame, &emitter).await;
        tracing::info!(query_id = %emitter.query_id(), outcome = ?run.outcome, "stream finished");
    });

    let event_stream = stream::unfold(rx, |mut rx: mpsc::UnboundedReceiver<OrchestratorEvent>| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), rx))
    });
    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// GET /api/middleware：中间件开关
async fn api_middleware(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let middleware = &state.graph.config().middleware;
    Json(serde_json::json!({
        "budget_enforcement": middleware.budget_enforcement,
        "error_recovery": middleware.error_recovery,
        "partial_results_enabled": middleware.partial_results,
    }))
}

/// GET /api/metrics：JSON 格式计数器
async fn api_metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.metrics.to_json())
}

/// GET /api/metrics/prometheus：Prometheus 文本格式
async fn api_metrics_prometheus(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.to_prometheus())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        Default::default()
    });
    let metrics = Arc::new(Metrics::new());
    let graph = GraphBuilder::new(cfg)
        .with_registry(demo_registry())
        .with_metrics(Arc::clone(&metrics))
        .build();
    let state = Arc::new(AppState {
        graph: Arc::new(graph),
        metrics,
    });

    let app = Router::new()
        .route("/api/query/stream", post(api_query_stream))
        .route("/api/middleware", get(api_middleware))
        .route("/api/metrics", get(api_metrics))
        .route("/api/metrics/prometheus", get(api_metrics_prometheus))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let addr = std::env::var("MEDQUERY_WEB_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    tracing::info!("MedQuery Web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
