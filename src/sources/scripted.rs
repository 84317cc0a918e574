//! 脚本化数据源客户端（用于测试与演示，无需外部 API）
//!
//! 按顺序回放预设的响应 / 错误，每步可带模拟延迟；脚本用完后重复最后一步，
//! 空脚本返回空结果。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{Filters, Frame};
use crate::sources::{SourceClient, SourceItem, SourceKind, SourceRegistry, SourceResult};

#[derive(Debug, Clone)]
struct ScriptStep {
    latency: Duration,
    outcome: Result<SourceResult, String>,
}

/// 回放脚本的 SourceClient
#[derive(Debug)]
pub struct ScriptedSource {
    kind: SourceKind,
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            steps: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    fn push(self, latency: Duration, outcome: Result<SourceResult, String>) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(ScriptStep { latency, outcome });
        }
        self
    }

    pub fn respond(self, result: SourceResult) -> Self {
        self.push(Duration::ZERO, Ok(result))
    }

    pub fn respond_after(self, latency: Duration, result: SourceResult) -> Self {
        self.push(latency, Ok(result))
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Duration::ZERO, Err(message.into()))
    }

    pub fn fail_after(self, latency: Duration, message: impl Into<String>) -> Self {
        self.push(latency, Err(message.into()))
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let next = self.steps.lock().ok().and_then(|mut steps| steps.pop_front());
        let mut last = self.last.lock().ok()?;
        match next {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, _frame: &Frame, _filters: &Filters, limit: usize) -> Result<SourceResult, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(step) = self.next_step() else {
            return Ok(SourceResult::empty());
        };
        if !step.latency.is_zero() {
            tokio::time::sleep(step.latency).await;
        }
        step.outcome.map(|mut result| {
            if limit > 0 && result.items.len() > limit {
                result.total_available.get_or_insert(result.items.len());
                result.items.truncate(limit);
            }
            result
        })
    }
}

/// 演示语料：三个数据源各若干条目；PubMed 首次调用返回限流错误以展示重试，
/// 知识库中一条与 PubMed 条目共享 pmid，去重后只保留一条
pub fn demo_registry() -> SourceRegistry {
    let papers = SourceResult::new(
        (1..=8)
            .map(|i| {
                SourceItem::literature(format!("3{:07}", i), format!("Metformin and healthy ageing: cohort study {i}"))
                    .with_year(2016 + i as i32)
                    .with_authors(&["Chen L", "Okafor N"])
                    .with_venue("J Clin Med")
                    .with_snippet(format!("Observational evidence from cohort {i} on all-cause mortality."))
                    .with_relevance(0.95 - i as f64 * 0.05)
            })
            .collect(),
    );
    let trials = SourceResult::new(
        (1..=4)
            .map(|i| {
                SourceItem::trial(format!("NCT0{:07}", 4_000_000 + i), format!("Metformin phase {} trial {i}", 1 + i % 3))
                    .with_year(2020 + i as i32)
                    .with_snippet("Randomized, double-blind, placebo-controlled.")
                    .with_relevance(0.8)
            })
            .collect(),
    );
    let chunks = SourceResult::new(vec![
        SourceItem::chunk("kb-001", "Metformin overview")
            .with_snippet("Internal summary of mechanism, dosing and safety signals.")
            .with_relevance(0.6),
        SourceItem::chunk("kb-002", "Cohort study 1 reading notes").with_pmid("30000001"),
    ])
    .cached();

    let mut registry = SourceRegistry::new();
    registry.register(
        ScriptedSource::new(SourceKind::Pubmed)
            .fail_after(Duration::from_millis(120), "429 Too Many Requests")
            .respond_after(Duration::from_millis(300), papers),
    );
    registry.register(ScriptedSource::new(SourceKind::ClinicalTrials).respond_after(Duration::from_millis(450), trials));
    registry.register(ScriptedSource::new(SourceKind::KnowledgeBase).respond_after(Duration::from_millis(40), chunks));
    registry
}
