//! 编排配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MEDQUERY__*` 覆盖（双下划线表示嵌套，
//! 如 `MEDQUERY__RECOVERY__MAX_ATTEMPTS=5`）。配置值显式传入 GraphBuilder，不存在全局单例。

use std::path::PathBuf;

use serde::Deserialize;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub budget: BudgetSection,
    pub recovery: RecoverySection,
    pub graph: GraphSection,
    pub middleware: MiddlewareSection,
    pub synthesis: SynthesisSection,
}

/// [budget] 段：默认预算、危险区阈值、时钟步长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    /// Frame 未指定 time_budget_ms 时使用
    pub default_time_budget_ms: u64,
    pub danger_zone_ratio: f64,
    /// 扇入等待期间同步预算时钟的间隔
    pub tick_ms: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            default_time_budget_ms: 30_000,
            danger_zone_ratio: 0.8,
            tick_ms: 100,
        }
    }
}

/// [recovery] 段：重试次数与退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    /// 0 表示不加抖动
    pub jitter_ratio: f64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            jitter_ratio: 0.0,
        }
    }
}

/// [graph] 段：并行度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub max_parallel_sources: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self { max_parallel_sources: 3 }
    }
}

/// [middleware] 段：三个中间件开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiddlewareSection {
    pub budget_enforcement: bool,
    pub error_recovery: bool,
    pub partial_results: bool,
}

impl Default for MiddlewareSection {
    fn default() -> Self {
        Self {
            budget_enforcement: true,
            error_recovery: true,
            partial_results: true,
        }
    }
}

/// [synthesis] 段：答案类型阈值与质量评分参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisSection {
    /// 单一数据源且条目数不超过此值 → MINIMAL
    pub minimal_max_items: usize,
    /// 多数据源且条目总数不少于此值 → COMPREHENSIVE
    pub comprehensive_min_items: usize,
    pub comprehensive_min_sources: usize,
    pub recency_window_years: u32,
    pub max_citations: usize,
    /// Frame 未指定 limit 时每个数据源的条目数
    pub default_limit: usize,
    /// 答案正文中每个数据源列出的条目数
    pub answer_items_per_source: usize,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            minimal_max_items: 2,
            comprehensive_min_items: 10,
            comprehensive_min_sources: 2,
            recency_window_years: 5,
            max_citations: 50,
            default_limit: 10,
            answer_items_per_source: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量 MEDQUERY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MEDQUERY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<OrchestratorConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MEDQUERY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
