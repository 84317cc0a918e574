//! 引用抽取：每个去重后的条目对应一条 Citation

use serde::Serialize;

use crate::sources::SourceKind;
use crate::synthesis::DedupedItem;

const SNIPPET_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub id: String,
    #[serde(rename = "type")]
    pub citation_type: String,
    pub title: String,
    pub authors: Vec<String>,
    pub source: String,
    pub year: Option<i32>,
    pub url: Option<String>,
    pub snippet: String,
    pub relevance_score: f64,
}

fn default_url(item: &DedupedItem) -> Option<String> {
    if let Some(url) = &item.item.url {
        return Some(url.clone());
    }
    if let Some(pmid) = item.id.strip_prefix("pmid:") {
        return Some(format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"));
    }
    if let Some(nct) = item.id.strip_prefix("nct:") {
        return Some(format!("https://clinicaltrials.gov/study/{nct}"));
    }
    None
}

fn truncate(text: &str) -> String {
    if text.chars().count() > SNIPPET_MAX_CHARS {
        let head: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        text.to_string()
    }
}

pub fn citation_for(item: &DedupedItem) -> Citation {
    let source: SourceKind = item.source;
    Citation {
        id: item.id.clone(),
        citation_type: source.citation_type().to_string(),
        title: item.item.title.clone(),
        authors: item.item.authors.clone(),
        source: source.label().to_string(),
        year: item.item.year,
        url: default_url(item),
        snippet: truncate(&item.item.snippet),
        relevance_score: item.item.relevance.unwrap_or(0.5).clamp(0.0, 1.0),
    }
}

/// 按去重顺序生成引用，至多 max 条
pub fn build_citations(items: &[DedupedItem], max: usize) -> Vec<Citation> {
    items.iter().take(max).map(citation_for).collect()
}
