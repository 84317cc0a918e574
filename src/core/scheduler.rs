//! 数据源调度：Semaphore 限制同时运行的数据源节点数
//!
//! 许可在节点整个重试循环期间持有；退避等待不释放许可。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// 数据源节点调度器
#[derive(Debug, Clone)]
pub struct SourceScheduler {
    semaphore: Arc<Semaphore>,
    max_parallel: usize,
}

impl SourceScheduler {
    pub fn new(max_parallel_sources: usize) -> Self {
        let max_parallel = max_parallel_sources.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
        }
    }

    /// 获取执行许可；token 先被取消则返回 None
    pub async fn acquire(&self, token: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

impl Default for SourceScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
