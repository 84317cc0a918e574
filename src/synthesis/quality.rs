//! 质量评分
//!
//! 五个相互独立的 0..=1 分量，overall_score 为算术平均（内部保留全精度，展示时保留一位小数）。

use serde::Serialize;

use crate::sources::SourceKind;
use crate::synthesis::DedupedItem;

/// 条目未给出相关度时的默认值
const DEFAULT_RELEVANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// 条目数 / 期望条目数
    pub completeness: f64,
    /// 处于时效窗口内的条目比例
    pub recency: f64,
    /// 数据源权威度均值
    pub authority: f64,
    /// 有贡献的数据源 / 路由的数据源
    pub diversity: f64,
    /// 相关度均值
    pub relevance: f64,
    pub overall_score: f64,
}

impl QualityMetrics {
    pub fn zero() -> Self {
        Self {
            completeness: 0.0,
            recency: 0.0,
            authority: 0.0,
            diversity: 0.0,
            relevance: 0.0,
            overall_score: 0.0,
        }
    }

    /// 展示用分数（一位小数）
    pub fn display_score(&self) -> f64 {
        (self.overall_score * 10.0).round() / 10.0
    }
}

/// 评分所需的外部参数
#[derive(Debug, Clone, Copy)]
pub struct QualityInputs {
    pub requested_per_source: usize,
    pub routed_sources: usize,
    pub recency_window_years: u32,
    pub reference_year: i32,
}

pub fn authority_weight(kind: SourceKind) -> f64 {
    match kind {
        SourceKind::Pubmed => 0.9,
        SourceKind::ClinicalTrials => 0.85,
        SourceKind::KnowledgeBase => 0.6,
    }
}

pub fn score(items: &[DedupedItem], inputs: &QualityInputs) -> QualityMetrics {
    if items.is_empty() {
        return QualityMetrics::zero();
    }
    let n = items.len() as f64;

    let expected = (inputs.requested_per_source * inputs.routed_sources.max(1)).max(1) as f64;
    let completeness = (n / expected).min(1.0);

    let cutoff = inputs.reference_year - inputs.recency_window_years as i32;
    let recent = items
        .iter()
        .filter(|i| i.item.year.is_some_and(|y| y >= cutoff))
        .count();
    let recency = recent as f64 / n;

    let authority = items.iter().map(|i| authority_weight(i.source)).sum::<f64>() / n;

    let mut sources: Vec<SourceKind> = items.iter().map(|i| i.source).collect();
    sources.sort();
    sources.dedup();
    let diversity = (sources.len() as f64 / inputs.routed_sources.max(1) as f64).min(1.0);

    let relevance = items
        .iter()
        .map(|i| i.item.relevance.unwrap_or(DEFAULT_RELEVANCE).clamp(0.0, 1.0))
        .sum::<f64>()
        / n;

    let overall_score = (completeness + recency + authority + diversity + relevance) / 5.0;
    QualityMetrics {
        completeness,
        recency,
        authority,
        diversity,
        relevance,
        overall_score,
    }
}
