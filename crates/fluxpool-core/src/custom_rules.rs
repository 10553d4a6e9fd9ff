//! Per-account override rules that pre-empt default error classification.
//!
//! Rules are evaluated in declaration order; the first rule whose status code
//! matches and whose keyword appears in the (capped, lower-cased) body wins.
//! A rule whose duration is non-positive, or whose pause end cannot be
//! represented, is inert and evaluation moves on.

use chrono::{DateTime, Duration, Utc};
use fluxpool_types::CustomRule;

/// Only this much of the body is searched.
pub const BODY_SCAN_MAX_BYTES: usize = 64 << 10;

/// A rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    pub rule: &'a CustomRule,
    pub index: usize,
    /// Trimmed keyword as configured (original casing)
    pub matched_keyword: String,
    /// End of the pause this rule imposes
    pub until: DateTime<Utc>,
}

/// Pause end for `rule` starting at `now`; `None` when the rule is inert.
fn rule_until(rule: &CustomRule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if rule.duration_minutes <= 0 {
        return None;
    }
    now.checked_add_signed(Duration::try_minutes(rule.duration_minutes)?)
}

/// Capped, lower-cased copy of a body for keyword search.
pub fn prepare_body(raw: &[u8]) -> String {
    let capped = &raw[..raw.len().min(BODY_SCAN_MAX_BYTES)];
    String::from_utf8_lossy(capped).to_lowercase()
}

fn match_keyword(body_lower: &str, keywords: &[String]) -> Option<String> {
    if body_lower.is_empty() {
        return None;
    }
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .find(|k| body_lower.contains(&k.to_lowercase()))
        .map(str::to_string)
}

/// First firing rule for this status code and body.
pub fn match_rule<'a>(
    rules: &'a [CustomRule],
    status_code: u16,
    body_lower: &str,
    now: DateTime<Utc>,
) -> Option<RuleMatch<'a>> {
    rules.iter().enumerate().find_map(|(index, rule)| {
        if rule.error_code != status_code || rule.keywords.is_empty() {
            return None;
        }
        let matched_keyword = match_keyword(body_lower, &rule.keywords)?;
        let Some(until) = rule_until(rule, now) else {
            tracing::debug!(
                "[CustomRule] rule {} matched '{}' but has no usable duration ({} min), skipping",
                index,
                matched_keyword,
                rule.duration_minutes
            );
            return None;
        };
        Some(RuleMatch { rule, index, matched_keyword, until })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    fn rule(code: u16, keywords: &[&str], minutes: i64) -> CustomRule {
        CustomRule {
            error_code: code,
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            duration_minutes: minutes,
            description: String::new(),
        }
    }

    #[test]
    fn test_first_match_wins_in_order() {
        let rules = vec![rule(403, &["banned"], 60), rule(403, &["banned", "suspended"], 120)];
        let body = prepare_body(b"Your account has been BANNED");
        let hit = match_rule(&rules, 403, &body, now());
        assert_eq!(hit.as_ref().map(|m| m.index), Some(0));
        assert_eq!(hit.map(|m| m.matched_keyword), Some("banned".to_string()));
    }

    #[test]
    fn test_status_code_must_match() {
        let rules = vec![rule(401, &["banned"], 60)];
        assert!(match_rule(&rules, 403, "banned", now()).is_none());
    }

    #[test]
    fn test_inert_rule_is_skipped_not_terminal() {
        let rules = vec![rule(403, &["banned"], 0), rule(403, &["ban"], 30)];
        let hit = match_rule(&rules, 403, "you are banned", now());
        assert_eq!(hit.as_ref().map(|m| m.index), Some(1));
        assert_eq!(hit.map(|m| m.until), Some(now() + Duration::minutes(30)));
    }

    #[test]
    fn test_unrepresentable_duration_is_inert() {
        let rules = vec![
            rule(403, &["blocked"], i64::MAX),
            rule(403, &["blocked"], 153_722_867_280_000),
            rule(403, &["blocked"], 90),
        ];
        let hit = match_rule(&rules, 403, "blocked", now());
        assert_eq!(hit.as_ref().map(|m| m.index), Some(2));
        assert_eq!(hit.map(|m| m.until), Some(now() + Duration::minutes(90)));
    }

    #[test]
    fn test_keywords_trimmed_and_blank_ignored() {
        let rules = vec![rule(400, &["  ", " Rate Exceeded "], 5)];
        let hit = match_rule(&rules, 400, &prepare_body(b"error: rate exceeded"), now());
        assert_eq!(hit.map(|m| m.matched_keyword), Some("Rate Exceeded".to_string()));
        assert!(match_rule(&[rule(400, &[], 5)], 400, "anything", now()).is_none());
    }

    #[test]
    fn test_body_scan_is_capped() {
        let mut body = vec![b'x'; BODY_SCAN_MAX_BYTES];
        body.extend_from_slice(b"banned");
        let rules = vec![rule(403, &["banned"], 60)];
        assert!(match_rule(&rules, 403, &prepare_body(&body), now()).is_none());
    }
}
