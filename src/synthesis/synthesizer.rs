//! 综合器
//!
//! 读取扇入后冻结的状态快照：去重 → 答案类型分类 → 质量评分 → 引用抽取 → 生成答案正文与 checkpoint id。
//! 综合阶段没有后备路径，任何错误都会作为致命错误返回给执行图。

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::config::SynthesisSection;
use crate::core::{OrchestratorError, OrchestratorState};
use crate::sources::SourceKind;
use crate::synthesis::{
    build_citations, checkpoint_id, deduplicate, score, Citation, DedupOutcome, DedupedItem, QualityInputs,
    QualityMetrics,
};

/// 答案完整度类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerType {
    /// 没有任何条目
    Empty,
    /// 单一数据源且条目极少
    Minimal,
    Partial,
    /// 多数据源且条目充足
    Comprehensive,
}

impl std::fmt::Display for AnswerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerType::Empty => write!(f, "EMPTY"),
            AnswerType::Minimal => write!(f, "MINIMAL"),
            AnswerType::Partial => write!(f, "PARTIAL"),
            AnswerType::Comprehensive => write!(f, "COMPREHENSIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisMetrics {
    pub citation_count: usize,
    /// 展示用质量分（一位小数）
    pub quality_score: f64,
    pub answer_type: AnswerType,
    pub sources_used: Vec<String>,
    pub duplicates_removed: usize,
    pub cache_hit_rate: f64,
}

/// 综合输出（交给展示层）
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutput {
    pub answer: String,
    pub checkpoint_id: String,
    pub citations: Vec<Citation>,
    pub quality_metrics: QualityMetrics,
    pub synthesis_metrics: SynthesisMetrics,
}

/// 综合阶段名与进度百分比
pub const STAGES: [(&str, u8); 4] = [
    ("deduplicating", 25),
    ("scoring", 50),
    ("extracting_citations", 75),
    ("composing_answer", 100),
];

#[derive(Debug, Clone)]
pub struct Synthesizer {
    config: SynthesisSection,
    reference_year: Option<i32>,
}

impl Synthesizer {
    pub fn new(config: SynthesisSection) -> Self {
        Self {
            config,
            reference_year: None,
        }
    }

    /// 固定时效计算的参照年份（默认取当前年份）
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    /// 按各数据源（去重后）条目数分类
    pub fn classify_answer(&self, counts: &BTreeMap<SourceKind, usize>) -> AnswerType {
        let total: usize = counts.values().sum();
        let contributing = counts.values().filter(|c| **c > 0).count();
        if total == 0 {
            AnswerType::Empty
        } else if contributing == 1 && total <= self.config.minimal_max_items {
            AnswerType::Minimal
        } else if contributing >= self.config.comprehensive_min_sources.max(2)
            && total >= self.config.comprehensive_min_items
        {
            AnswerType::Comprehensive
        } else {
            AnswerType::Partial
        }
    }

    pub fn synthesize(&self, state: &OrchestratorState) -> Result<SynthesisOutput, OrchestratorError> {
        self.synthesize_with(state, |_, _| {})
    }

    /// 综合并在每个阶段开始时回调 (stage, progress_percent)
    pub fn synthesize_with(
        &self,
        state: &OrchestratorState,
        mut on_stage: impl FnMut(&str, u8),
    ) -> Result<SynthesisOutput, OrchestratorError> {
        let [dedup_stage, scoring_stage, citation_stage, compose_stage] = STAGES;

        on_stage(dedup_stage.0, dedup_stage.1);
        let deduped = deduplicate(state);
        let counts = deduped.counts_by_source();
        let answer_type = self.classify_answer(&counts);

        on_stage(scoring_stage.0, scoring_stage.1);
        let quality_metrics = score(&deduped.items, &self.quality_inputs(state));

        on_stage(citation_stage.0, citation_stage.1);
        let citations = build_citations(&deduped.items, self.config.max_citations);

        on_stage(compose_stage.0, compose_stage.1);
        let checkpoint_id = checkpoint_id(&state.query, &state.frame, &deduped.ids())?;
        let answer = self.compose_answer(state, &deduped, answer_type, &citations);

        let synthesis_metrics = SynthesisMetrics {
            citation_count: citations.len(),
            quality_score: quality_metrics.display_score(),
            answer_type,
            sources_used: counts.keys().map(|k| k.tag().to_string()).collect(),
            duplicates_removed: deduped.duplicates_removed,
            cache_hit_rate: state.cache_hit_rate(),
        };
        tracing::debug!(
            checkpoint = %checkpoint_id,
            answer_type = %answer_type,
            citations = citations.len(),
            "synthesis done"
        );

        Ok(SynthesisOutput {
            answer,
            checkpoint_id,
            citations,
            quality_metrics,
            synthesis_metrics,
        })
    }

    fn quality_inputs(&self, state: &OrchestratorState) -> QualityInputs {
        let requested_per_source = if state.frame.filters.limit > 0 {
            state.frame.filters.limit
        } else {
            self.config.default_limit
        };
        let routed_sources = state
            .routing_decision
            .as_ref()
            .map(|d| d.sources.len())
            .unwrap_or_else(|| state.available_sources().len());
        QualityInputs {
            requested_per_source,
            routed_sources,
            recency_window_years: state.frame.filters.recency_years.unwrap_or(self.config.recency_window_years),
            reference_year: self.reference_year.unwrap_or_else(|| chrono::Utc::now().year()),
        }
    }

    fn compose_answer(
        &self,
        state: &OrchestratorState,
        deduped: &DedupOutcome,
        answer_type: AnswerType,
        citations: &[Citation],
    ) -> String {
        let counts = deduped.counts_by_source();
        let total = deduped.items.len();
        let mut out = format!("## {}\n\n", state.query.trim());

        let lead = match answer_type {
            AnswerType::Empty => "No evidence was found for this query across the consulted sources.".to_string(),
            AnswerType::Minimal => format!(
                "Limited evidence: {} item(s) from {} only.",
                total,
                counts.keys().map(|k| k.label()).collect::<Vec<_>>().join(", ")
            ),
            AnswerType::Partial => format!(
                "Partial evidence from {} source(s) covering {} item(s).",
                counts.len(),
                total
            ),
            AnswerType::Comprehensive => format!(
                "Evidence from {} sources covering {} items.",
                counts.len(),
                total
            ),
        };
        out.push_str(&lead);
        out.push('\n');

        for kind in SourceKind::ALL {
            let items: Vec<&DedupedItem> = deduped.items.iter().filter(|i| i.source == kind).collect();
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("\n### {} ({})\n", kind.label(), items.len()));
            for item in items.iter().take(self.config.answer_items_per_source) {
                out.push_str(&format!("- {}", item.item.title.trim()));
                if let Some(year) = item.item.year {
                    out.push_str(&format!(" ({year})"));
                }
                if let Some(idx) = citations.iter().position(|c| c.id == item.id) {
                    out.push_str(&format!(" [{}]", idx + 1));
                }
                out.push('\n');
            }
        }

        let limitations = self.limitations(state);
        if !limitations.is_empty() {
            out.push_str("\n### Limitations\n");
            for line in limitations {
                out.push_str(&format!("- {line}\n"));
            }
        }
        out
    }

    /// 路由过但没有结果的数据源及原因
    fn limitations(&self, state: &OrchestratorState) -> Vec<String> {
        let Some(decision) = &state.routing_decision else {
            return Vec::new();
        };
        decision
            .sources
            .iter()
            .filter(|kind| state.result(**kind).is_none())
            .map(|kind| {
                let reason = state
                    .errors
                    .iter()
                    .rev()
                    .find(|e| e.node == kind.node_name())
                    .map(|e| format!("{} ({})", e.error, e.strategy))
                    .unwrap_or_else(|| "no result (skipped or cancelled)".to_string());
                format!("{} unavailable: {}", kind.label(), reason)
            })
            .collect()
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(SynthesisSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Frame, Intent, RoutingDecision};
    use crate::sources::{SourceItem, SourceResult};

    fn state_with(pubmed: Option<usize>, ctgov: Option<usize>) -> OrchestratorState {
        let mut state = OrchestratorState::new("q1", "metformin and aging", Frame::new(Intent::General));
        state.routing_decision = Some(RoutingDecision {
            sources: vec![SourceKind::Pubmed, SourceKind::ClinicalTrials],
            reason: "test".to_string(),
        });
        if let Some(n) = pubmed {
            state.pubmed_results = Some(SourceResult::new(
                (0..n)
                    .map(|i| SourceItem::literature(format!("{}", 1000 + i), format!("Paper {i}")).with_year(2022))
                    .collect(),
            ));
        }
        if let Some(n) = ctgov {
            state.ctgov_results = Some(SourceResult::new(
                (0..n)
                    .map(|i| SourceItem::trial(format!("NCT{:08}", i), format!("Trial {i}")))
                    .collect(),
            ));
        }
        state
    }

    fn synth() -> Synthesizer {
        Synthesizer::default().with_reference_year(2024)
    }

    #[test]
    fn test_empty_results_are_empty() {
        let out = synth().synthesize(&state_with(Some(0), Some(0))).unwrap();
        assert_eq!(out.synthesis_metrics.answer_type, AnswerType::Empty);
        assert!(out.citations.is_empty());
        assert_eq!(out.quality_metrics.overall_score, 0.0);
        assert!(out.answer.contains("No evidence"));
    }

    #[test]
    fn test_citations_stop_at_configured_cap() {
        let at_cap = synth().synthesize(&state_with(Some(40), Some(10))).unwrap();
        assert_eq!(at_cap.citations.len(), 50);

        let over_cap = synth().synthesize(&state_with(Some(45), Some(10))).unwrap();
        assert_eq!(over_cap.citations.len(), 50);
        assert_eq!(over_cap.synthesis_metrics.citation_count, 50);
        let ids: std::collections::BTreeSet<&str> = over_cap.citations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 50);
        // 超出上限的条目不生成引用，但仍计入 checkpoint
        assert_ne!(at_cap.checkpoint_id, over_cap.checkpoint_id);
    }

    #[test]
    fn test_ten_plus_five_is_comprehensive() {
        let out = synth().synthesize(&state_with(Some(10), Some(5))).unwrap();
        assert_eq!(out.synthesis_metrics.answer_type, AnswerType::Comprehensive);
        assert_eq!(out.citations.len(), 15);
        assert_eq!(out.synthesis_metrics.citation_count, 15);
        assert_eq!(out.synthesis_metrics.sources_used, vec!["pubmed", "ctgov"]);
    }

    #[test]
    fn test_single_source_small_is_minimal() {
        let out = synth().synthesize(&state_with(Some(2), None)).unwrap();
        assert_eq!(out.synthesis_metrics.answer_type, AnswerType::Minimal);
        assert!(out.answer.contains("ClinicalTrials.gov unavailable"));
    }

    #[test]
    fn test_single_source_many_items_is_not_comprehensive() {
        let out = synth().synthesize(&state_with(Some(30), None)).unwrap();
        assert_eq!(out.synthesis_metrics.answer_type, AnswerType::Partial);
    }

    #[test]
    fn test_classification_thresholds() {
        let s = synth();
        let counts = |p: usize, c: usize| {
            let mut m = BTreeMap::new();
            if p > 0 {
                m.insert(SourceKind::Pubmed, p);
            }
            if c > 0 {
                m.insert(SourceKind::ClinicalTrials, c);
            }
            m
        };
        assert_eq!(s.classify_answer(&counts(0, 0)), AnswerType::Empty);
        assert_eq!(s.classify_answer(&counts(1, 0)), AnswerType::Minimal);
        assert_eq!(s.classify_answer(&counts(3, 0)), AnswerType::Partial);
        assert_eq!(s.classify_answer(&counts(1, 1)), AnswerType::Partial);
        assert_eq!(s.classify_answer(&counts(9, 1)), AnswerType::Comprehensive);
        assert_eq!(s.classify_answer(&counts(5, 4)), AnswerType::Partial);
    }

    #[test]
    fn test_checkpoint_is_deterministic() {
        let state = state_with(Some(3), Some(2));
        let a = synth().synthesize(&state).unwrap();
        let b = synth().synthesize(&state).unwrap();
        assert_eq!(a.checkpoint_id, b.checkpoint_id);
        assert_eq!(a.answer, b.answer);
    }

    #[test]
    fn test_duplicate_ids_yield_one_citation_each() {
        let mut state = state_with(Some(3), None);
        if let Some(r) = state.pubmed_results.as_mut() {
            let copy = r.items.clone();
            r.items.extend(copy);
        }
        let out = synth().synthesize(&state).unwrap();
        assert_eq!(out.citations.len(), 3);
        assert_eq!(out.synthesis_metrics.duplicates_removed, 3);
    }

    #[test]
    fn test_stage_callbacks_in_order() {
        let mut stages = Vec::new();
        synth()
            .synthesize_with(&state_with(Some(1), None), |stage, pct| stages.push((stage.to_string(), pct)))
            .unwrap();
        let pcts: Vec<u8> = stages.iter().map(|(_, p)| *p).collect();
        assert_eq!(pcts, vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_citation_markers_in_answer() {
        let out = synth().synthesize(&state_with(Some(2), Some(1))).unwrap();
        assert!(out.answer.contains("[1]"));
        assert!(out.answer.contains("[3]"));
        assert!(out.answer.contains("### PubMed (2)"));
    }
}
