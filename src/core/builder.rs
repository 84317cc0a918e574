//! 执行图构建器：统一的初始化逻辑
//!
//! CLI、Web 与测试共用同一套构建路径；配置值显式传入，不依赖全局状态。

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{load_config, OrchestratorConfig};
use crate::core::{ErrorClassifier, ExecutionGraph, OrchestratorError};
use crate::observability::Metrics;
use crate::sources::{SourceClient, SourceRegistry};
use crate::synthesis::Synthesizer;

/// ExecutionGraph 构建器
pub struct GraphBuilder {
    config: OrchestratorConfig,
    registry: SourceRegistry,
    classifier: Option<ErrorClassifier>,
    synthesizer: Option<Synthesizer>,
    metrics: Option<Arc<Metrics>>,
    cancel_token: Option<CancellationToken>,
}

impl GraphBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: SourceRegistry::new(),
            classifier: None,
            synthesizer: None,
            metrics: None,
            cancel_token: None,
        }
    }

    /// 从 config/default.toml（及可选文件、环境变量）加载配置
    pub fn from_config_file(path: Option<PathBuf>) -> Result<Self, OrchestratorError> {
        Ok(Self::new(load_config(path)?))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 注册单个数据源客户端
    pub fn with_source(mut self, client: impl SourceClient + 'static) -> Self {
        self.registry.register(client);
        self
    }

    /// 替换默认分类规则表
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// 共享计数器（多个图或 Web 服务共用）
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 外部取消令牌：取消后所有查询的节点随之放弃
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn build(self) -> ExecutionGraph {
        if self.registry.is_empty() {
            tracing::warn!("building execution graph with no registered sources");
        }
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Synthesizer::new(self.config.synthesis.clone()));
        ExecutionGraph::new(
            self.config,
            self.registry,
            self.classifier.unwrap_or_default(),
            synthesizer,
            self.metrics.unwrap_or_default(),
            self.cancel_token,
        )
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}
