//! 跨数据源去重
//!
//! 扁平化各数据源结果并分配稳定 id：文献 `pmid:<id>`，试验 `nct:<id>`，
//! 其它条目 `<source>:<标题哈希>`。按 id 去重，保留首次出现者并标注来源 `_source`。

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::OrchestratorState;
use crate::sources::{SourceItem, SourceKind};

/// 去重后的条目
#[derive(Debug, Clone, Serialize)]
pub struct DedupedItem {
    #[serde(rename = "stable_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: SourceKind,
    #[serde(flatten)]
    pub item: SourceItem,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub items: Vec<DedupedItem>,
    pub duplicates_removed: usize,
}

impl DedupOutcome {
    /// 各数据源贡献的条目数（只含至少贡献 1 条的数据源）
    pub fn counts_by_source(&self) -> BTreeMap<SourceKind, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.source).or_insert(0) += 1;
        }
        counts
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }
}

/// 标题归一化后的短哈希
pub fn title_hash(title: &str) -> String {
    let normalized = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..6])
}

fn non_empty(id: Option<&String>) -> Option<&str> {
    id.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// 条目的跨数据源稳定 id
pub fn stable_id(source: SourceKind, item: &SourceItem) -> String {
    if let Some(pmid) = non_empty(item.pmid.as_ref()) {
        return format!("pmid:{pmid}");
    }
    if let Some(nct) = non_empty(item.nct_id.as_ref()) {
        return format!("nct:{}", nct.to_uppercase());
    }
    format!("{}:{}", source.tag(), title_hash(&item.title))
}

/// 按固定数据源顺序扁平化并去重
pub fn deduplicate(state: &OrchestratorState) -> DedupOutcome {
    let mut seen = HashSet::new();
    let mut outcome = DedupOutcome::default();
    for kind in SourceKind::ALL {
        let Some(result) = state.result(kind) else {
            continue;
        };
        for item in &result.items {
            let id = stable_id(kind, item);
            if seen.insert(id.clone()) {
                outcome.items.push(DedupedItem {
                    id,
                    source: kind,
                    item: item.clone(),
                });
            } else {
                outcome.duplicates_removed += 1;
            }
        }
    }
    outcome
}
