//! MedQuery - 生物医学检索查询编排引擎
//!
//! 模块划分：
//! - **config**: 编排配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复、预算、状态模型、路由、执行图
//! - **events**: 有序事件流（progress / retry / budget / synthesis / completion）
//! - **observability**: tracing 初始化与计数器
//! - **sources**: 数据源客户端接口、注册表与节点适配器
//! - **synthesis**: 去重、质量评分、引用、答案类型与 checkpoint

pub mod config;
pub mod core;
pub mod events;
pub mod observability;
pub mod sources;
pub mod synthesis;

pub use crate::config::{load_config, OrchestratorConfig};
pub use crate::core::{ExecutionGraph, GraphBuilder, QueryOutcome, QueryRun};
pub use crate::events::{EventEmitter, OrchestratorEvent};
