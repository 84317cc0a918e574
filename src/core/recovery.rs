//! 错误恢复策略器
//!
//! 根据分类后的错误与尝试次数返回 RecoveryStrategy，供执行图决定重试、跳过、
//! 使用部分结果还是永久失败。决策表按顺序求值：
//! 1. attempt >= max_attempts → FAIL_PERMANENTLY
//! 2. CRITICAL → FAIL_PERMANENTLY
//! 3. NON_RECOVERABLE → SKIP_AND_CONTINUE
//! 4. RECOVERABLE 且预算允许等待 → RETRY_WITH_BACKOFF（delay = base * 2^(attempt-1)）
//! 5. 其它 → PARTIAL_RESULTS

use serde::Serialize;

use crate::config::RecoverySection;
use crate::core::{ClassifiedError, RecoveryAction, Severity};

/// 策略器的一次决策
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStrategy {
    pub action: RecoveryAction,
    pub reason: String,
    pub should_continue: bool,
    pub delay_seconds: f64,
}

impl RecoveryStrategy {
    fn new(action: RecoveryAction, reason: impl Into<String>, should_continue: bool) -> Self {
        Self {
            action,
            reason: reason.into(),
            should_continue,
            delay_seconds: 0.0,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        (self.delay_seconds * 1000.0).round() as u64
    }
}

/// 退避参数与抖动
#[derive(Debug, Clone)]
pub struct RecoveryStrategist {
    base_delay_secs: f64,
    max_delay_secs: f64,
    /// 0 表示纯指数退避
    jitter_ratio: f64,
}

impl RecoveryStrategist {
    pub fn new(base_delay_secs: f64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs: f64::MAX,
            jitter_ratio: 0.0,
        }
    }

    pub fn from_config(config: &RecoverySection) -> Self {
        Self {
            base_delay_secs: config.base_delay_secs,
            max_delay_secs: config.max_delay_secs,
            jitter_ratio: config.jitter_ratio.max(0.0),
        }
    }

    pub fn with_max_delay(mut self, max_delay_secs: f64) -> Self {
        self.max_delay_secs = max_delay_secs;
        self
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.max(0.0);
        self
    }

    /// 第 attempt 次失败后的等待秒数（attempt 从 1 开始）
    pub fn backoff_delay(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = (self.base_delay_secs * 2f64.powi(exponent)).min(self.max_delay_secs);
        if self.jitter_ratio > 0.0 {
            delay * (1.0 + fastrand::f64() * self.jitter_ratio)
        } else {
            delay
        }
    }

    /// 不考虑预算的决策
    pub fn decide(&self, error: &ClassifiedError, attempt: u32, max_attempts: u32) -> RecoveryStrategy {
        self.decide_within(error, attempt, max_attempts, None)
    }

    /// 考虑剩余预算的决策：若退避等待会耗尽预算，则退化为 PARTIAL_RESULTS
    pub fn decide_within(
        &self,
        error: &ClassifiedError,
        attempt: u32,
        max_attempts: u32,
        remaining_ms: Option<u64>,
    ) -> RecoveryStrategy {
        if attempt >= max_attempts {
            return RecoveryStrategy::new(
                RecoveryAction::FailPermanently,
                format!("Max attempts ({max_attempts}) reached for {}", error.error_type),
                false,
            );
        }

        match error.severity {
            Severity::Critical => RecoveryStrategy::new(
                RecoveryAction::FailPermanently,
                format!("Critical {} error, not retrying", error.error_type),
                false,
            ),
            Severity::NonRecoverable => RecoveryStrategy::new(
                RecoveryAction::SkipAndContinue,
                format!("Non-recoverable {} error, skipping source", error.error_type),
                true,
            ),
            Severity::Recoverable => {
                let delay_seconds = self.backoff_delay(attempt);
                let delay_ms = (delay_seconds * 1000.0).round() as u64;
                match remaining_ms {
                    Some(remaining) if delay_ms >= remaining => RecoveryStrategy::new(
                        RecoveryAction::PartialResults,
                        format!(
                            "{} is retryable but backoff ({delay_ms}ms) exceeds remaining budget ({remaining}ms)",
                            error.error_type
                        ),
                        true,
                    ),
                    _ => RecoveryStrategy {
                        action: RecoveryAction::RetryWithBackoff,
                        reason: format!(
                            "Recoverable {} error, retry {}/{} after {:.1}s",
                            error.error_type,
                            attempt + 1,
                            max_attempts,
                            delay_seconds
                        ),
                        should_continue: true,
                        delay_seconds,
                    },
                }
            }
        }
    }
}

impl Default for RecoveryStrategist {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorClassifier;

    fn classified(msg: &str) -> ClassifiedError {
        ErrorClassifier::default().classify(msg)
    }

    #[test]
    fn test_rate_limit_first_attempt_retries_with_base_delay() {
        let strategist = RecoveryStrategist::new(1.0);
        let s = strategist.decide(&classified("429 too many requests"), 1, 3);
        assert_eq!(s.action, RecoveryAction::RetryWithBackoff);
        assert!(s.should_continue);
        assert_eq!(s.delay_seconds, 1.0);
        assert_eq!(s.delay_ms(), 1000);
    }

    #[test]
    fn test_backoff_sequence_doubles() {
        let strategist = RecoveryStrategist::new(1.0);
        let delays: Vec<f64> = (1..=4).map(|a| strategist.backoff_delay(a)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn test_backoff_respects_cap() {
        let strategist = RecoveryStrategist::new(1.0).with_max_delay(3.0);
        assert_eq!(strategist.backoff_delay(3), 3.0);
    }

    #[test]
    fn test_jitter_never_shrinks_delay() {
        let strategist = RecoveryStrategist::new(1.0).with_jitter(0.5);
        for attempt in 1..=3 {
            let base = 2f64.powi(attempt as i32 - 1);
            let d = strategist.backoff_delay(attempt);
            assert!(d >= base && d <= base * 1.5, "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn test_exhausted_attempts_fail_for_every_type() {
        let strategist = RecoveryStrategist::default();
        for msg in ["429", "timeout", "invalid api key", "400 bad request", "503", "weird"] {
            for (attempt, max) in [(3, 3), (4, 3), (1, 1), (0, 0)] {
                let s = strategist.decide(&classified(msg), attempt, max);
                assert_eq!(s.action, RecoveryAction::FailPermanently, "{msg} {attempt}/{max}");
                assert!(!s.should_continue);
            }
        }
    }

    #[test]
    fn test_critical_never_retried() {
        let strategist = RecoveryStrategist::default();
        let s = strategist.decide(&classified("invalid api key"), 1, 5);
        assert_eq!(s.action, RecoveryAction::FailPermanently);
        assert!(!s.should_continue);
        assert_eq!(s.delay_seconds, 0.0);
    }

    #[test]
    fn test_validation_skips() {
        let strategist = RecoveryStrategist::default();
        let s = strategist.decide(&classified("400 Bad Request"), 1, 3);
        assert_eq!(s.action, RecoveryAction::SkipAndContinue);
        assert!(s.should_continue);
    }

    #[test]
    fn test_budget_too_small_falls_back_to_partial() {
        let strategist = RecoveryStrategist::new(1.0);
        let s = strategist.decide_within(&classified("503 Service Unavailable"), 2, 3, Some(1500));
        assert_eq!(s.action, RecoveryAction::PartialResults);
        assert!(s.should_continue);

        let s = strategist.decide_within(&classified("503 Service Unavailable"), 1, 3, Some(1500));
        assert_eq!(s.action, RecoveryAction::RetryWithBackoff);
    }
}
