//! 执行时间预算
//!
//! 为一次查询分配墙钟时间预算，各并行数据源节点共享同一个 BudgetTracker。
//! 写入通过原子操作串行化（fetch_add / fetch_max），读取无锁、允许短暂过期。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 默认危险区阈值
pub const DEFAULT_DANGER_ZONE: f64 = 0.8;

/// 预算快照（供事件与监控使用）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub allocated_ms: u64,
    pub consumed_ms: u64,
    pub remaining_ms: u64,
    /// 恒在 [0.0, 1.0]
    pub utilization: f64,
}

/// 预算跟踪器
#[derive(Debug)]
pub struct BudgetTracker {
    allocated_ms: AtomicU64,
    consumed_ms: AtomicU64,
    /// 墙钟起点（相对 epoch 的毫秒偏移），allocate 时重置
    started_offset_ms: AtomicU64,
    epoch: Instant,
    danger_zone: f64,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self {
            allocated_ms: AtomicU64::new(0),
            consumed_ms: AtomicU64::new(0),
            started_offset_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            danger_zone: DEFAULT_DANGER_ZONE,
        }
    }

    /// 设置危险区阈值（利用率达到该值即进入危险区）
    pub fn with_danger_zone(mut self, ratio: f64) -> Self {
        self.danger_zone = ratio.clamp(0.0, 1.0);
        self
    }

    /// 分配总预算并重置已消耗与墙钟起点
    pub fn allocate(&self, total_ms: u64) {
        self.allocated_ms.store(total_ms, Ordering::SeqCst);
        self.consumed_ms.store(0, Ordering::SeqCst);
        self.started_offset_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
    }

    /// 记录一次显式消耗，返回消耗后的快照
    pub fn consume(&self, ms: u64) -> BudgetStatus {
        self.consumed_ms.fetch_add(ms, Ordering::SeqCst);
        self.status()
    }

    /// 将已消耗推进到墙钟已流逝的时间（不会回退）
    pub fn sync_clock(&self) -> BudgetStatus {
        let elapsed = self.elapsed_ms();
        self.consumed_ms.fetch_max(elapsed, Ordering::SeqCst);
        self.status()
    }

    /// allocate 以来的墙钟时间
    pub fn elapsed_ms(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(self.started_offset_ms.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> BudgetStatus {
        let allocated_ms = self.allocated_ms.load(Ordering::SeqCst);
        let consumed_ms = self.consumed_ms.load(Ordering::SeqCst);
        let utilization = if allocated_ms == 0 {
            1.0
        } else {
            (consumed_ms as f64 / allocated_ms as f64).clamp(0.0, 1.0)
        };
        BudgetStatus {
            allocated_ms,
            consumed_ms,
            remaining_ms: allocated_ms.saturating_sub(consumed_ms),
            utilization,
        }
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.status().remaining_ms)
    }

    /// 墙钟截止时刻（用于扇入等待）
    pub fn deadline(&self) -> Instant {
        let start = self.epoch + Duration::from_millis(self.started_offset_ms.load(Ordering::SeqCst));
        start + Duration::from_millis(self.allocated_ms.load(Ordering::SeqCst))
    }

    pub fn is_exhausted(&self) -> bool {
        self.status().remaining_ms == 0
    }

    pub fn in_danger_zone(&self) -> bool {
        self.status().utilization >= self.danger_zone
    }

    pub fn danger_zone(&self) -> f64 {
        self.danger_zone
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new()
    }
}
