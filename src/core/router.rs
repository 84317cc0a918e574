//! 路由：按查询意图选择数据源

use crate::core::{Frame, Intent, RoutingDecision};
use crate::sources::SourceKind;

/// 意图 → 有序数据源列表
pub fn sources_for(intent: Intent) -> Vec<SourceKind> {
    match intent {
        Intent::LiteratureReview => vec![SourceKind::Pubmed, SourceKind::KnowledgeBase],
        Intent::ClinicalTrials => vec![SourceKind::ClinicalTrials, SourceKind::Pubmed],
        Intent::DrugInformation | Intent::General => SourceKind::ALL.to_vec(),
    }
}

/// ROUTE 阶段：生成路由决策
pub fn route(frame: &Frame) -> RoutingDecision {
    let sources = sources_for(frame.intent);
    let names: Vec<&str> = sources.iter().map(|s| s.label()).collect();
    RoutingDecision {
        reason: format!("intent {:?} routes to {}", frame.intent, names.join(", ")),
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trials_intent_prefers_registry() {
        let decision = route(&Frame::new(Intent::ClinicalTrials));
        assert_eq!(decision.sources, vec![SourceKind::ClinicalTrials, SourceKind::Pubmed]);
        assert!(decision.reason.contains("ClinicalTrials.gov"));
    }

    #[test]
    fn test_general_intent_fans_out_to_all() {
        assert_eq!(sources_for(Intent::General).len(), 3);
        assert_eq!(sources_for(Intent::DrugInformation), SourceKind::ALL.to_vec());
    }

    #[test]
    fn test_literature_review_skips_trials() {
        assert!(!sources_for(Intent::LiteratureReview).contains(&SourceKind::ClinicalTrials));
    }
}
