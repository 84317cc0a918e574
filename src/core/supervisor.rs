//! 查询监管：单个查询的取消令牌
//!
//! 每个查询一个根 token，每个数据源节点持有子 token；提前扇入时取消根 token，
//! 所有仍在运行的节点随之被放弃。

use tokio_util::sync::CancellationToken;

/// 查询级生命周期管理
#[derive(Debug, Default)]
pub struct QuerySupervisor {
    cancel_token: CancellationToken,
}

impl QuerySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂在外部 token 之下（调用方取消时本查询一并取消）
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            cancel_token: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（单个数据源节点）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children() {
        let supervisor = QuerySupervisor::new();
        let child = supervisor.child_token();
        assert!(!child.is_cancelled());
        supervisor.cancel();
        assert!(child.is_cancelled());
        assert!(supervisor.is_cancelled());
    }

    #[test]
    fn test_parent_cancel_reaches_query() {
        let parent = CancellationToken::new();
        let supervisor = QuerySupervisor::with_parent(&parent);
        parent.cancel();
        assert!(supervisor.is_cancelled());
    }
}
