//! 数据源：检索客户端抽象与节点适配
//!
//! 真实的文献 / 临床试验 / 知识库 API 客户端属于外部协作者，只需实现 SourceClient：
//! `search(frame, filters, limit) -> SourceResult | 错误文本`。错误文本交给 ErrorClassifier 分类，
//! 重试与退避全部由编排层负责。

pub mod node;
pub mod registry;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Filters, Frame};

pub use node::SourceNode;
pub use registry::SourceRegistry;
pub use scripted::{demo_registry, ScriptedSource};

/// 数据源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 文献检索（PubMed）
    Pubmed,
    /// 临床试验检索（ClinicalTrials.gov）
    #[serde(rename = "ctgov")]
    ClinicalTrials,
    /// 内部知识库
    #[serde(rename = "kb")]
    KnowledgeBase,
}

impl SourceKind {
    /// 固定顺序：扁平化、去重与展示都按此顺序
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Pubmed,
        SourceKind::ClinicalTrials,
        SourceKind::KnowledgeBase,
    ];

    /// 执行图中的节点名
    pub fn node_name(&self) -> &'static str {
        match self {
            SourceKind::Pubmed => "pubmed_search",
            SourceKind::ClinicalTrials => "ctgov_search",
            SourceKind::KnowledgeBase => "kb_search",
        }
    }

    /// 去重 id 前缀与 `_source` 标签
    pub fn tag(&self) -> &'static str {
        match self {
            SourceKind::Pubmed => "pubmed",
            SourceKind::ClinicalTrials => "ctgov",
            SourceKind::KnowledgeBase => "kb",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Pubmed => "PubMed",
            SourceKind::ClinicalTrials => "ClinicalTrials.gov",
            SourceKind::KnowledgeBase => "Knowledge Base",
        }
    }

    /// 引用类型
    pub fn citation_type(&self) -> &'static str {
        match self {
            SourceKind::Pubmed => "literature",
            SourceKind::ClinicalTrials => "clinical_trial",
            SourceKind::KnowledgeBase => "knowledge_base",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// 单个检索条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// 数据源内的原始 id（PMID / NCT 号 / 知识库 chunk id）
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: String,
    /// 数据源给出的相关度，0..=1
    pub relevance: Option<f64>,
    /// 条目关联的 PubMed id（知识库条目也可能带）
    pub pmid: Option<String>,
    /// 条目关联的 NCT 号
    pub nct_id: Option<String>,
    /// 期刊 / 注册机构 / 知识库集合名
    pub venue: Option<String>,
}

impl SourceItem {
    fn bare(id: String, title: String) -> Self {
        Self {
            id,
            title,
            authors: Vec::new(),
            year: None,
            url: None,
            snippet: String::new(),
            relevance: None,
            pmid: None,
            nct_id: None,
            venue: None,
        }
    }

    /// 文献条目：id 即 PMID
    pub fn literature(pmid: impl Into<String>, title: impl Into<String>) -> Self {
        let pmid = pmid.into();
        let mut item = Self::bare(pmid.clone(), title.into());
        item.pmid = Some(pmid);
        item
    }

    /// 临床试验条目：id 即 NCT 号
    pub fn trial(nct_id: impl Into<String>, title: impl Into<String>) -> Self {
        let nct_id = nct_id.into();
        let mut item = Self::bare(nct_id.clone(), title.into());
        item.nct_id = Some(nct_id);
        item
    }

    /// 知识库片段
    pub fn chunk(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::bare(id.into(), title.into())
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_authors(mut self, authors: &[&str]) -> Self {
        self.authors = authors.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_pmid(mut self, pmid: impl Into<String>) -> Self {
        self.pmid = Some(pmid.into());
        self
    }
}

/// 一个数据源的检索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub items: Vec<SourceItem>,
    /// 数据源报告的命中总数（可能大于 items.len()）
    pub total_available: Option<usize>,
    #[serde(default)]
    pub cache_hit: bool,
}

impl SourceResult {
    pub fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            total_available: None,
            cache_hit: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn cached(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total_available = Some(total);
        self
    }
}

/// 数据源客户端 trait：返回结果或错误文本
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn search(&self, frame: &Frame, filters: &Filters, limit: usize) -> Result<SourceResult, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_names_and_tags() {
        assert_eq!(SourceKind::Pubmed.node_name(), "pubmed_search");
        assert_eq!(SourceKind::ClinicalTrials.node_name(), "ctgov_search");
        assert_eq!(SourceKind::KnowledgeBase.node_name(), "kb_search");
        assert_eq!(SourceKind::ClinicalTrials.tag(), "ctgov");
        assert_eq!(SourceKind::KnowledgeBase.tag(), "kb");
    }

    #[test]
    fn test_item_constructors_set_identifiers() {
        let paper = SourceItem::literature("123", "A");
        assert_eq!(paper.pmid.as_deref(), Some("123"));
        let trial = SourceItem::trial("NCT01", "B");
        assert_eq!(trial.nct_id.as_deref(), Some("NCT01"));
        let chunk = SourceItem::chunk("c1", "C");
        assert!(chunk.pmid.is_none() && chunk.nct_id.is_none());
    }
}
