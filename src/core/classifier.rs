//! 错误分类器
//!
//! 规则表驱动：有序的 (ErrorType, 模式集合) 列表，按 RATE_LIMIT → NETWORK_TIMEOUT →
//! AUTHENTICATION → VALIDATION → SERVICE_UNAVAILABLE 顺序匹配，首个命中者胜出，
//! 均未命中则为 UNKNOWN。匹配大小写不敏感。

use regex::Regex;

use crate::core::{ClassifiedError, ErrorType};

/// 单条分类规则：任一模式命中即归为该类型
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub error_type: ErrorType,
    patterns: Vec<Regex>,
}

impl ClassifierRule {
    /// 由模式字符串构造；模式按正则解析，统一加 `(?i)`
    pub fn new(error_type: ErrorType, patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            error_type,
            patterns,
        })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(message))
    }
}

const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"rate[\s_-]?limit",
    r"\b429\b",
    r"quota exceeded",
    r"throttl",
    r"too many requests",
];

const NETWORK_TIMEOUT_PATTERNS: &[&str] = &[
    r"time[\s_-]?out",
    r"timed out",
    r"deadline exceeded",
    r"connection (reset|refused|closed|aborted)",
    r"network (error|unreachable)",
    r"\bdns\b",
];

const AUTHENTICATION_PATTERNS: &[&str] = &[
    r"\b401\b",
    r"\b403\b",
    r"unauthori[sz]ed",
    r"forbidden",
    r"invalid (api[\s_-]?key|token|credentials)",
    r"authentication",
    r"api[\s_-]?key",
];

const VALIDATION_PATTERNS: &[&str] = &[
    r"\b400\b",
    r"\b422\b",
    r"invalid",
    r"validation",
    r"malformed",
    r"bad request",
    r"missing (required )?(field|parameter)",
];

const SERVICE_UNAVAILABLE_PATTERNS: &[&str] = &[
    r"\b50[0234]\b",
    r"service unavailable",
    r"bad gateway",
    r"internal server error",
    r"maintenance",
    r"temporarily unavailable",
];

/// 错误分类器：持有有序规则表
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl ErrorClassifier {
    /// 空规则表（所有错误归为 UNKNOWN）
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// 在规则表末尾追加一条规则（优先级低于已有规则）
    pub fn with_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// 将错误文本映射为 (ErrorType, Severity)
    pub fn classify(&self, message: &str) -> ClassifiedError {
        let error_type = self
            .rules
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.error_type)
            .unwrap_or(ErrorType::Unknown);
        ClassifiedError {
            error_type,
            severity: error_type.severity(),
            message: message.to_string(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let table: [(ErrorType, &[&str]); 5] = [
            (ErrorType::RateLimit, RATE_LIMIT_PATTERNS),
            (ErrorType::NetworkTimeout, NETWORK_TIMEOUT_PATTERNS),
            (ErrorType::Authentication, AUTHENTICATION_PATTERNS),
            (ErrorType::Validation, VALIDATION_PATTERNS),
            (ErrorType::ServiceUnavailable, SERVICE_UNAVAILABLE_PATTERNS),
        ];
        let rules = table
            .into_iter()
            .filter_map(|(error_type, patterns)| match ClassifierRule::new(error_type, patterns) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::error!("invalid built-in pattern for {}: {}", error_type, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    fn classify(msg: &str) -> (ErrorType, Severity) {
        let c = ErrorClassifier::default().classify(msg);
        (c.error_type, c.severity)
    }

    #[test]
    fn test_builtin_table_compiles() {
        assert_eq!(ErrorClassifier::default().rule_count(), 5);
    }

    #[test]
    fn test_rate_limit_phrases() {
        for msg in [
            "Rate limit exceeded",
            "HTTP 429",
            "429 too many requests",
            "Quota Exceeded for project",
            "request throttling in effect",
        ] {
            assert_eq!(classify(msg), (ErrorType::RateLimit, Severity::Recoverable), "{msg}");
        }
    }

    #[test]
    fn test_authentication_phrases_are_critical() {
        for msg in ["invalid api key", "401 Unauthorized", "403 Forbidden", "Authentication failed"] {
            assert_eq!(classify(msg), (ErrorType::Authentication, Severity::Critical), "{msg}");
        }
    }

    #[test]
    fn test_network_timeout() {
        assert_eq!(
            classify("request timed out after 30s"),
            (ErrorType::NetworkTimeout, Severity::Recoverable)
        );
        assert_eq!(
            classify("Connection reset by peer"),
            (ErrorType::NetworkTimeout, Severity::Recoverable)
        );
    }

    #[test]
    fn test_validation_is_non_recoverable() {
        assert_eq!(
            classify("400 Bad Request: malformed term"),
            (ErrorType::Validation, Severity::NonRecoverable)
        );
    }

    #[test]
    fn test_service_unavailable() {
        assert_eq!(
            classify("503 Service Unavailable"),
            (ErrorType::ServiceUnavailable, Severity::Recoverable)
        );
    }

    #[test]
    fn test_priority_order_first_match_wins() {
        // 同时命中 AUTHENTICATION 与 VALIDATION（"invalid"），前者优先
        assert_eq!(classify("invalid api key").0, ErrorType::Authentication);
        // 同时命中 RATE_LIMIT 与 SERVICE_UNAVAILABLE
        assert_eq!(classify("503: rate limit reached").0, ErrorType::RateLimit);
    }

    #[test]
    fn test_unknown_default() {
        assert_eq!(classify("something odd happened"), (ErrorType::Unknown, Severity::Recoverable));
        assert_eq!(classify(""), (ErrorType::Unknown, Severity::Recoverable));
    }

    #[test]
    fn test_numeric_codes_need_word_boundary() {
        // 4290 条记录不应被当作 429
        assert_eq!(classify("fetched 4290 records then failed").0, ErrorType::Unknown);
    }

    #[test]
    fn test_custom_rule_extends_table() {
        let classifier = ErrorClassifier::empty()
            .with_rule(ClassifierRule::new(ErrorType::ServiceUnavailable, &["upstream overloaded"]).unwrap());
        assert_eq!(
            classifier.classify("Upstream OVERLOADED").error_type,
            ErrorType::ServiceUnavailable
        );
        assert_eq!(classifier.classify("429").error_type, ErrorType::Unknown);
    }
}
