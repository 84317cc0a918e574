//! 状态定义：Frame、OrchestratorState 与节点增量更新
//!
//! OrchestratorState 是贯穿所有节点的唯一可变记录，只由执行图的扇入步骤写入。
//! 节点不直接修改状态，而是产出 StateUpdate，由 apply 按字段规则合并：
//! 序列字段只追加；数据源结果槽只会被「成功」的结果替换，失败的重试不会抹掉已有结果。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ErrorType, RecoveryAction, Severity};
use crate::sources::{SourceKind, SourceResult};

/// 支持的查询形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// 文献综述
    LiteratureReview,
    /// 临床试验检索
    ClinicalTrials,
    /// 药物信息
    DrugInformation,
    /// 未细分的一般问题
    General,
}

/// 数据源缓存策略，原样透传给数据源客户端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    #[default]
    PreferCache,
    BypassCache,
    CacheOnly,
}

/// 检索过滤条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    /// 仅保留最近 N 年的条目
    pub recency_years: Option<u32>,
    /// 每个数据源的条目上限
    pub limit: usize,
    /// 其它数据源特定过滤（如 trial phase、status）
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            recency_years: None,
            limit: 10,
            extra: BTreeMap::new(),
        }
    }
}

/// 归一化后的查询：由外部解析器产出，之后不可变
///
/// entities 与 filters.extra 使用 BTreeMap，保证序列化顺序稳定（checkpoint 依赖这一点）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub intent: Intent,
    pub entities: BTreeMap<String, String>,
    pub filters: Filters,
    pub fetch_policy: FetchPolicy,
    pub time_budget_ms: u64,
}

impl Frame {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            entities: BTreeMap::new(),
            filters: Filters::default(),
            fetch_policy: FetchPolicy::default(),
            time_budget_ms: 0,
        }
    }

    pub fn with_entity(mut self, slot: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(slot.into(), value.into());
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = ms;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}

/// ROUTE 阶段的产出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub sources: Vec<SourceKind>,
    pub reason: String,
}

/// 一条错误记录（只追加）
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub node: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub strategy: RecoveryAction,
    pub reason: String,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub attempt: u32,
}

/// 单次节点执行的结果，合并进状态后丢弃
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node: String,
    pub success: bool,
    pub data: Option<SourceResult>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub attempt_number: u32,
    pub cache_hit: bool,
}

impl NodeResult {
    pub fn ok(node: impl Into<String>, data: SourceResult, duration_ms: u64, attempt_number: u32) -> Self {
        let cache_hit = data.cache_hit;
        Self {
            node: node.into(),
            success: true,
            data: Some(data),
            error_message: None,
            duration_ms,
            attempt_number,
            cache_hit,
        }
    }

    pub fn failed(node: impl Into<String>, error: impl Into<String>, duration_ms: u64, attempt_number: u32) -> Self {
        Self {
            node: node.into(),
            success: false,
            data: None,
            error_message: Some(error.into()),
            duration_ms,
            attempt_number,
            cache_hit: false,
        }
    }
}

/// 节点产出的部分更新；apply 时逐字段合并
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub routing_decision: Option<RoutingDecision>,
    /// 仅成功结果会写入
    pub source_result: Option<(SourceKind, SourceResult)>,
    pub tool_call: Option<String>,
    pub cache_hit: Option<(String, bool)>,
    pub latency: Option<(String, u64)>,
    pub errors: Vec<ErrorRecord>,
    pub node_path: Vec<String>,
    pub messages: Vec<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由一次数据源节点执行构造：成功则带上结果槽
    pub fn from_node_result(kind: SourceKind, result: NodeResult) -> Self {
        let mut update = Self {
            tool_call: Some(result.node.clone()),
            cache_hit: Some((result.node.clone(), result.cache_hit)),
            latency: Some((result.node.clone(), result.duration_ms)),
            node_path: vec![result.node.clone()],
            ..Self::default()
        };
        if result.success {
            if let Some(data) = result.data {
                update.messages.push(format!(
                    "{} returned {} items (attempt {}, {}ms{})",
                    result.node,
                    data.items.len(),
                    result.attempt_number,
                    result.duration_ms,
                    if result.cache_hit { ", cached" } else { "" }
                ));
                update.source_result = Some((kind, data));
            }
        } else {
            update.messages.push(format!(
                "{} failed on attempt {}: {}",
                result.node,
                result.attempt_number,
                result.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
        update
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.node_path.push(marker.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn error(mut self, record: ErrorRecord) -> Self {
        self.errors.push(record);
        self
    }
}

/// 查询执行的完整状态
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorState {
    pub query_id: String,
    pub query: String,
    pub frame: Frame,
    pub routing_decision: Option<RoutingDecision>,
    pub pubmed_results: Option<SourceResult>,
    pub ctgov_results: Option<SourceResult>,
    pub kb_results: Option<SourceResult>,
    pub tool_calls_made: Vec<String>,
    pub cache_hits: BTreeMap<String, bool>,
    pub latencies: BTreeMap<String, u64>,
    pub errors: Vec<ErrorRecord>,
    pub node_path: Vec<String>,
    pub answer: Option<String>,
    pub checkpoint_id: Option<String>,
    pub messages: Vec<String>,
}

impl OrchestratorState {
    pub fn new(query_id: impl Into<String>, query: impl Into<String>, frame: Frame) -> Self {
        Self {
            query_id: query_id.into(),
            query: query.into(),
            frame,
            routing_decision: None,
            pubmed_results: None,
            ctgov_results: None,
            kb_results: None,
            tool_calls_made: Vec::new(),
            cache_hits: BTreeMap::new(),
            latencies: BTreeMap::new(),
            errors: Vec::new(),
            node_path: Vec::new(),
            answer: None,
            checkpoint_id: None,
            messages: Vec::new(),
        }
    }

    pub fn result(&self, kind: SourceKind) -> Option<&SourceResult> {
        match kind {
            SourceKind::Pubmed => self.pubmed_results.as_ref(),
            SourceKind::ClinicalTrials => self.ctgov_results.as_ref(),
            SourceKind::KnowledgeBase => self.kb_results.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: SourceKind) -> &mut Option<SourceResult> {
        match kind {
            SourceKind::Pubmed => &mut self.pubmed_results,
            SourceKind::ClinicalTrials => &mut self.ctgov_results,
            SourceKind::KnowledgeBase => &mut self.kb_results,
        }
    }

    /// 设置数据源结果槽（测试与恢复场景使用；图内部走 apply）
    pub fn set_result(&mut self, kind: SourceKind, result: SourceResult) {
        *self.slot_mut(kind) = Some(result);
    }

    /// 按字段规则合并一个更新
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(decision) = update.routing_decision {
            if self.routing_decision.is_none() {
                self.routing_decision = Some(decision);
            }
        }
        if let Some((kind, result)) = update.source_result {
            *self.slot_mut(kind) = Some(result);
        }
        if let Some(node) = update.tool_call {
            self.tool_calls_made.push(node);
        }
        if let Some((node, hit)) = update.cache_hit {
            // 任一次尝试命中缓存即记为命中
            let entry = self.cache_hits.entry(node).or_insert(false);
            *entry = *entry || hit;
        }
        if let Some((node, ms)) = update.latency {
            *self.latencies.entry(node).or_insert(0) += ms;
        }
        self.errors.extend(update.errors);
        self.node_path.extend(update.node_path);
        self.messages.extend(update.messages);
    }

    /// 已写入结果槽的数据源（按固定顺序）
    pub fn available_sources(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.result(*kind).is_some())
            .collect()
    }

    /// 缓存命中率：命中节点数 / 全部工具调用数；无调用时为 0.0
    pub fn cache_hit_rate(&self) -> f64 {
        if self.tool_calls_made.is_empty() {
            return 0.0;
        }
        let hits = self.cache_hits.values().filter(|hit| **hit).count();
        hits as f64 / self.tool_calls_made.len() as f64
    }
}
