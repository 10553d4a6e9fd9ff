//! Quota-exhaustion detection for 429 responses.

use super::error_body::ErrorBody;

/// Structured codes that mean "quota gone" rather than "slow down".
pub const QUOTA_CODES: [&str; 6] = [
    "insufficient_quota",
    "quota_exceeded",
    "billing_hard_limit_reached",
    "billing_hard_limit",
    "hard_limit_reached",
    "account_limit_reached",
];

/// Message fragments (lower-case) that indicate quota exhaustion.
const QUOTA_KEYWORDS: [&str; 23] = [
    "insufficient quota",
    "quota exceeded",
    "exceeded your current quota",
    "exceeded your quota",
    "exceeded the quota",
    "hard limit",
    "billing hard limit",
    "usage limit",
    "usage cap",
    "plan limit",
    "out of quota",
    "out of credits",
    "out of credit",
    "insufficient credits",
    "account limit",
    "quota has been exceeded",
    "quota exceeded for",
    "exceeded the allowed",
    "额度",
    "配额",
    "超限",
    "限额",
    "余额不足",
];

pub fn is_quota_code(code: &str) -> bool {
    QUOTA_CODES.contains(&code)
}

pub fn contains_quota_keyword(message_lower: &str) -> bool {
    !message_lower.is_empty() && QUOTA_KEYWORDS.iter().any(|kw| message_lower.contains(kw))
}

/// Evidence that a 429 is quota exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSignal {
    /// `error.code` as sent, for the log reason
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Returns `Some` when the body carries a quota code or quota wording.
pub fn detect_quota_exceeded(body: &ErrorBody) -> Option<QuotaSignal> {
    let message = body.message();
    let signal = QuotaSignal { code: body.error_code(), message: message.clone() };

    if body.code_candidates().iter().any(|c| is_quota_code(c)) {
        return Some(signal);
    }
    let lower = message.map(|m| m.to_lowercase()).unwrap_or_default();
    contains_quota_keyword(&lower).then_some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_codes_in_any_field() {
        for raw in [
            r#"{"error":{"code":"insufficient_quota"}}"#,
            r#"{"error":{"type":"Quota_Exceeded"}}"#,
            r#"{"error":{"status":"billing_hard_limit_reached"}}"#,
            r#"{"type":"account_limit_reached"}"#,
        ] {
            assert!(detect_quota_exceeded(&ErrorBody::parse(raw.as_bytes())).is_some(), "{raw}");
        }
    }

    #[test]
    fn test_keywords_in_message() {
        let body = ErrorBody::parse(
            br#"{"error":{"type":"rate_limit_error","message":"You have reached your Usage Cap"}}"#,
        );
        let signal = detect_quota_exceeded(&body);
        assert!(signal.is_some());

        let body = ErrorBody::parse(r#"{"error":{"message":"账户额度不足"}}"#.as_bytes());
        assert!(detect_quota_exceeded(&body).is_some());
    }

    #[test]
    fn test_plain_rate_limit_is_not_quota() {
        let body = ErrorBody::parse(
            br#"{"error":{"type":"rate_limit_error","message":"Number of requests has exceeded your per-minute rate limit"}}"#,
        );
        assert_eq!(detect_quota_exceeded(&body), None);
        assert_eq!(detect_quota_exceeded(&ErrorBody::parse(b"")), None);
    }
}
