//! 错误类型与恢复动作
//!
//! 与 RecoveryStrategist 配合：ErrorClassifier 将节点错误文本映射为 (ErrorType, Severity)，
//! 策略器再据此决定 RetryWithBackoff / SkipAndContinue / PartialResults / FailPermanently。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 节点错误类别（按分类优先级排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    RateLimit,
    NetworkTimeout,
    Authentication,
    Validation,
    ServiceUnavailable,
    Unknown,
}

impl ErrorType {
    /// 固定的严重程度映射，不随调用变化
    pub fn severity(&self) -> Severity {
        match self {
            ErrorType::RateLimit
            | ErrorType::NetworkTimeout
            | ErrorType::ServiceUnavailable
            | ErrorType::Unknown => Severity::Recoverable,
            ErrorType::Authentication => Severity::Critical,
            ErrorType::Validation => Severity::NonRecoverable,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorType::RateLimit => write!(f, "RATE_LIMIT"),
            ErrorType::NetworkTimeout => write!(f, "NETWORK_TIMEOUT"),
            ErrorType::Authentication => write!(f, "AUTHENTICATION"),
            ErrorType::Validation => write!(f, "VALIDATION"),
            ErrorType::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
            ErrorType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// 可重试（限流、超时、服务暂不可用）
    Recoverable,
    /// 重试无意义，但不影响其它数据源
    NonRecoverable,
    /// 整个查询必须终止（认证失败不会自愈）
    Critical,
}

/// 恢复策略器给出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryAction {
    /// 指数退避后重试当前节点
    RetryWithBackoff,
    /// 跳过该数据源，继续其它节点
    SkipAndContinue,
    /// 放弃重试，使用已有的部分结果
    PartialResults,
    /// 节点永久失败
    FailPermanently,
}

impl RecoveryAction {
    /// 写入 node_path 的恢复标记
    pub fn marker(&self) -> &'static str {
        match self {
            RecoveryAction::RetryWithBackoff => "recovery_retry",
            RecoveryAction::SkipAndContinue => "recovery_skipped",
            RecoveryAction::PartialResults => "recovery_partial",
            RecoveryAction::FailPermanently => "recovery_failed",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryAction::RetryWithBackoff => write!(f, "RETRY_WITH_BACKOFF"),
            RecoveryAction::SkipAndContinue => write!(f, "SKIP_AND_CONTINUE"),
            RecoveryAction::PartialResults => write!(f, "PARTIAL_RESULTS"),
            RecoveryAction::FailPermanently => write!(f, "FAIL_PERMANENTLY"),
        }
    }
}

/// 一次节点失败的分类结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,
}

/// 编排层对调用方可见的错误；单个节点的失败不会以此形式抛出
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Critical failure in {node}: {message}")]
    CriticalFailure { node: String, message: String },

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}
