//! 数据源注册表
//!
//! 所有客户端实现 SourceClient，由 SourceRegistry 按 SourceKind 注册与查找；
//! 路由决定的数据源若未注册，执行图会将其记为 skipped。

use std::collections::HashMap;
use std::sync::Arc;

use crate::sources::{SourceClient, SourceKind};

/// 数据源注册表：每种数据源至多一个客户端，后注册者覆盖先注册者
#[derive(Default, Clone)]
pub struct SourceRegistry {
    clients: HashMap<SourceKind, Arc<dyn SourceClient>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: impl SourceClient + 'static) {
        self.clients.insert(client.kind(), Arc::new(client));
    }

    pub fn register_arc(&mut self, client: Arc<dyn SourceClient>) {
        self.clients.insert(client.kind(), client);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceClient>> {
        self.clients.get(&kind).cloned()
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.clients.contains_key(&kind)
    }

    /// 已注册的数据源（固定顺序）
    pub fn kinds(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|k| self.clients.contains_key(k))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ScriptedSource;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());
        registry.register(ScriptedSource::new(SourceKind::KnowledgeBase));
        registry.register(ScriptedSource::new(SourceKind::Pubmed));
        assert!(registry.contains(SourceKind::Pubmed));
        assert!(registry.get(SourceKind::ClinicalTrials).is_none());
        assert_eq!(registry.kinds(), vec![SourceKind::Pubmed, SourceKind::KnowledgeBase]);
    }
}
