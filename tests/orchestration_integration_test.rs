//! 编排引擎集成测试：通过公开 API 驱动完整查询

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use medquery::core::{
    BudgetTracker, ErrorClassifier, ErrorType, FetchPolicy, Filters, Frame, Intent, QueryOutcome, RecoveryAction,
    RecoveryStrategist, Severity,
};
use medquery::events::{drain, EventEmitter, EventKind, OrchestratorEvent};
use medquery::sources::{ScriptedSource, SourceClient, SourceItem, SourceKind, SourceRegistry, SourceResult};
use medquery::synthesis::AnswerType;
use medquery::{GraphBuilder, OrchestratorConfig, QueryRun};

fn papers(range: std::ops::Range<usize>) -> SourceResult {
    SourceResult::new(
        range
            .map(|i| SourceItem::literature(format!("{}", 9000 + i), format!("Paper {i}")).with_year(2022))
            .collect(),
    )
}

fn trials(n: usize) -> SourceResult {
    SourceResult::new(
        (0..n)
            .map(|i| SourceItem::trial(format!("NCT{:08}", 500 + i), format!("Trial {i}")))
            .collect(),
    )
}

async fn run(sources: Vec<ScriptedSource>, frame: Frame) -> (QueryRun, Vec<OrchestratorEvent>) {
    let mut builder = GraphBuilder::new(OrchestratorConfig::default());
    for s in sources {
        builder = builder.with_source(s);
    }
    let graph = builder.build();
    let (emitter, mut rx) = EventEmitter::channel("it-query");
    let run = graph.execute_with_events("metformin in type 2 diabetes", frame, &emitter).await;
    (run, drain(&mut rx))
}

fn trials_frame() -> Frame {
    Frame::new(Intent::ClinicalTrials)
        .with_entity("drug", "metformin")
        .with_time_budget_ms(20_000)
}

fn names(events: &[OrchestratorEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_empty_results_complete_as_empty() {
    let (run, events) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed).respond(SourceResult::empty()),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond(SourceResult::empty()),
        ],
        trials_frame(),
    )
    .await;

    let synthesis = run.synthesis.expect("synthesis output");
    assert_eq!(synthesis.synthesis_metrics.answer_type, AnswerType::Empty);
    assert!(synthesis.citations.is_empty());
    assert_eq!(run.outcome, QueryOutcome::Completed);
    assert_eq!(names(&events).last(), Some(&"query_completed"));
}

#[tokio::test(start_paused = true)]
async fn test_ten_papers_five_trials_comprehensive() {
    let (run, events) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed).respond(papers(0..10)),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond(trials(5)),
        ],
        trials_frame(),
    )
    .await;

    let synthesis = run.synthesis.expect("synthesis output");
    assert_eq!(synthesis.synthesis_metrics.answer_type, AnswerType::Comprehensive);
    assert_eq!(synthesis.citations.len(), 15);
    assert!(synthesis.checkpoint_id.starts_with("ckpt_"));
    assert_eq!(run.state.checkpoint_id.as_deref(), Some(synthesis.checkpoint_id.as_str()));

    let completed = events.iter().find_map(|e| match &e.kind {
        EventKind::SynthesisCompleted { metrics, .. } => Some(metrics.citation_count),
        _ => None,
    });
    assert_eq!(completed, Some(15));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_on_first_attempt_retries_after_base_delay() {
    let classifier = ErrorClassifier::default();
    let error = classifier.classify("429 too many requests");
    assert_eq!((error.error_type, error.severity), (ErrorType::RateLimit, Severity::Recoverable));
    let strategy = RecoveryStrategist::new(1.0).decide(&error, 1, 3);
    assert_eq!(strategy.action, RecoveryAction::RetryWithBackoff);
    assert_eq!(strategy.delay_seconds, 1.0);
    assert!(strategy.should_continue);

    let (run, events) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed)
                .fail("429 too many requests")
                .respond(papers(0..2)),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond(trials(1)),
        ],
        trials_frame(),
    )
    .await;
    let path = &run.state.node_path;
    let idx = path.iter().position(|p| p == "recovery_retry").expect("retry marker");
    assert_eq!(path[idx - 1], "pubmed_search");
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::RetryAttempt { node, delay_ms: 1000, max_attempts: 3, .. } if node == "pubmed_search"
    )));
    assert_eq!(run.outcome, QueryOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_api_key_fails_query() {
    let (run, events) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed).fail("invalid api key"),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond_after(Duration::from_secs(3), trials(2)),
        ],
        trials_frame(),
    )
    .await;

    assert!(run.is_failed());
    assert_eq!(run.state.errors.len(), 1);
    assert_eq!(run.state.errors[0].strategy, RecoveryAction::FailPermanently);
    assert_eq!(run.state.errors[0].error_type, ErrorType::Authentication);
    // 认证错误不重试
    assert_eq!(
        run.state.tool_calls_made.iter().filter(|n| *n == "pubmed_search").count(),
        1
    );
    let event_names = names(&events);
    assert_eq!(event_names.last(), Some(&"query_failed"));
    assert!(!event_names.contains(&"query_completed"));
}

#[tokio::test]
async fn test_danger_zone_emits_single_budget_warning() {
    let tracker = BudgetTracker::new();
    tracker.allocate(10_000);
    let status = tracker.consume(9_000);
    assert!(tracker.in_danger_zone());
    assert!(!tracker.is_exhausted());
    assert_eq!(status.remaining_ms, 1_000);

    let (emitter, mut rx) = EventEmitter::channel("budget-query");
    assert!(emitter.budget_warning(&status));
    assert!(!emitter.budget_warning(&tracker.consume(500)));
    let warnings: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::BudgetWarning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_triggers_one_warning_then_completes() {
    let frame = Frame::new(Intent::LiteratureReview).with_time_budget_ms(10_000);
    let (run, events) = run(
        vec![ScriptedSource::new(SourceKind::Pubmed).respond_after(Duration::from_millis(9_500), papers(0..3))],
        frame,
    )
    .await;
    assert_eq!(run.outcome, QueryOutcome::Completed);
    assert!(run.state.pubmed_results.is_some());
    assert_eq!(names(&events).iter().filter(|n| **n == "budget_warning").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_stable_across_runs() {
    let make = || {
        vec![
            ScriptedSource::new(SourceKind::Pubmed).respond(papers(0..4)),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond(trials(2)),
        ]
    };
    let (a, _) = run(make(), trials_frame()).await;
    let (b, _) = run(make(), trials_frame()).await;
    assert_eq!(a.state.checkpoint_id, b.state.checkpoint_id);
    assert!(a.state.checkpoint_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cross_source_duplicates_cited_once() {
    let kb = SourceResult::new(vec![
        SourceItem::chunk("kb-1", "notes on paper 0").with_pmid("9000"),
        SourceItem::chunk("kb-2", "notes on paper 1").with_pmid("9001"),
        SourceItem::chunk("kb-3", "internal guideline"),
    ]);
    let (run, _) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed).respond(papers(0..3)),
            ScriptedSource::new(SourceKind::KnowledgeBase).respond(kb),
        ],
        Frame::new(Intent::LiteratureReview),
    )
    .await;
    let synthesis = run.synthesis.expect("synthesis output");
    assert_eq!(synthesis.citations.len(), 4);
    assert_eq!(synthesis.synthesis_metrics.duplicates_removed, 2);
    let mut ids: Vec<_> = synthesis.citations.iter().map(|c| c.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_registered_sources_yields_empty_and_zero_cache_rate() {
    let (run, _) = run(Vec::new(), Frame::new(Intent::General)).await;
    assert!(run.state.tool_calls_made.is_empty());
    assert_eq!(run.state.cache_hit_rate(), 0.0);
    let synthesis = run.synthesis.expect("synthesis output");
    assert_eq!(synthesis.synthesis_metrics.answer_type, AnswerType::Empty);
    assert_eq!(synthesis.synthesis_metrics.cache_hit_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_does_not_block_sibling_nodes() {
    let (_run, events) = run(
        vec![
            ScriptedSource::new(SourceKind::Pubmed)
                .fail("503 service unavailable")
                .respond(papers(0..2)),
            ScriptedSource::new(SourceKind::ClinicalTrials).respond_after(Duration::from_millis(500), trials(2)),
        ],
        trials_frame(),
    )
    .await;

    let position = |source: &str, status: &str| {
        events.iter().position(|e| {
            matches!(&e.kind, EventKind::Progress { source: s, status: st, .. } if s == source && st == status)
        })
    };
    let ctgov_done = position("ctgov", "completed").expect("ctgov completed");
    let pubmed_retry = position("pubmed", "retrying").expect("pubmed retried");
    assert!(ctgov_done < pubmed_retry);
}

#[tokio::test]
async fn test_retry_delay_sequence_doubles() {
    let strategist = RecoveryStrategist::new(1.0);
    let delays: Vec<f64> = (1..=4).map(|a| strategist.backoff_delay(a)).collect();
    assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0]);
    let error = ErrorClassifier::default().classify("connection timed out");
    for attempt in 3..6 {
        assert_eq!(
            strategist.decide(&error, attempt, 3).action,
            RecoveryAction::FailPermanently
        );
    }
}

/// 记录收到的 Frame 的客户端
struct RecordingSource {
    seen: Mutex<Vec<(FetchPolicy, usize)>>,
}

#[async_trait]
impl SourceClient for RecordingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::KnowledgeBase
    }

    async fn search(&self, frame: &Frame, _filters: &Filters, limit: usize) -> Result<SourceResult, String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((frame.fetch_policy, limit));
        }
        Ok(SourceResult::new(vec![SourceItem::chunk("c1", "chunk")]).cached())
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_client_receives_frame_and_cache_hit_counted() {
    let recorder = Arc::new(RecordingSource {
        seen: Mutex::new(Vec::new()),
    });
    let mut registry = SourceRegistry::new();
    registry.register_arc(recorder.clone());
    let graph = GraphBuilder::default().with_registry(registry).build();

    let frame = Frame::new(Intent::LiteratureReview).with_fetch_policy(FetchPolicy::BypassCache);
    let state = graph.execute("guideline lookup", frame).await;

    let seen = recorder.seen.lock().map(|s| s.clone()).unwrap_or_default();
    assert_eq!(seen, vec![(FetchPolicy::BypassCache, 10)]);
    assert_eq!(state.cache_hit_rate(), 1.0);
    assert!(state.node_path.iter().any(|p| p == "pubmed_search:skipped"));
}
