//! 401 handling inputs: upstream trust and high-confidence credential failure.

use axum::http::HeaderMap;
use fluxpool_types::{Account, CredentialType};
use url::Url;

use super::error_body::{looks_like_html, ErrorBody};

/// Phrases that unambiguously mean the key itself is wrong.
const INVALID_KEY_NEEDLES: [&str; 9] = [
    "incorrect api key",
    "incorrect api key provided",
    "invalid api key",
    "invalid_api_key",
    "api key is invalid",
    "api key is not valid",
    "missing api key",
    "no api key provided",
    "invalid x-api-key",
];

/// Whether 401s from this account's upstream can be taken at face value.
///
/// Non-apikey accounts always talk to the provider directly. apikey accounts
/// are trusted only when their base URL is empty or points at the provider's
/// official API host.
pub fn is_trusted_upstream(account: &Account) -> bool {
    if account.credential_type != CredentialType::ApiKey {
        return true;
    }
    let Some(official) = account.platform.official_api_host() else {
        return true;
    };
    let base_url = account.base_url.trim();
    if base_url.is_empty() {
        return true;
    }
    let Ok(parsed) = Url::parse(base_url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host) == official
}

/// High-confidence "this credential is invalid" signal for a 401 response.
pub fn should_hard_disable_401(account: &Account, headers: &HeaderMap, raw_body: &[u8]) -> bool {
    if account.credential_type.is_oauth_like() || !is_trusted_upstream(account) {
        return false;
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if content_type.contains("text/html") || looks_like_html(raw_body) {
        return false;
    }

    let body = ErrorBody::parse(raw_body);
    if body.error_code().is_some_and(|code| code.eq_ignore_ascii_case("invalid_api_key")) {
        return true;
    }

    let message = body
        .message()
        .unwrap_or_else(|| String::from_utf8_lossy(raw_body).into_owned())
        .to_lowercase();
    if INVALID_KEY_NEEDLES.iter().any(|needle| message.contains(needle)) {
        return true;
    }

    let www_auth = headers
        .get(axum::http::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let header_says_invalid = www_auth.contains("invalid") || www_auth.contains("expired");
    let message_mentions_key = message.contains("api key")
        || message.contains("x-api-key")
        || message.contains("invalid_api_key");
    header_says_invalid && message_mentions_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use fluxpool_types::Platform;

    fn apikey(platform: Platform, base_url: &str) -> Account {
        let mut account = Account::new(1, platform, CredentialType::ApiKey);
        account.base_url = base_url.to_string();
        account
    }

    #[test]
    fn test_trust_by_base_url() {
        assert!(is_trusted_upstream(&apikey(Platform::Anthropic, "")));
        assert!(is_trusted_upstream(&apikey(Platform::Anthropic, "https://api.anthropic.com")));
        assert!(is_trusted_upstream(&apikey(Platform::OpenAi, "https://WWW.api.openai.com/v1")));
        assert!(!is_trusted_upstream(&apikey(Platform::OpenAi, "https://relay.example.com/v1")));
        assert!(!is_trusted_upstream(&apikey(Platform::OpenAi, "not a url")));
        assert!(is_trusted_upstream(&apikey(Platform::Antigravity, "https://anything.test")));
        assert!(is_trusted_upstream(&Account::new(2, Platform::OpenAi, CredentialType::OAuth)));
    }

    #[test]
    fn test_hard_disable_requires_strong_signal() {
        let account = apikey(Platform::OpenAi, "");
        let headers = HeaderMap::new();

        assert!(should_hard_disable_401(
            &account,
            &headers,
            br#"{"error":{"code":"invalid_api_key","message":"x"}}"#
        ));
        assert!(should_hard_disable_401(
            &account,
            &headers,
            br#"{"error":{"message":"Incorrect API key provided: sk-***"}}"#
        ));
        assert!(!should_hard_disable_401(
            &account,
            &headers,
            br#"{"error":{"message":"Unauthorized"}}"#
        ));
    }

    #[test]
    fn test_html_and_oauth_never_hard_disable() {
        let account = apikey(Platform::OpenAi, "");
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html; charset=utf-8"));
        assert!(!should_hard_disable_401(&account, &headers, b"invalid api key"));

        let oauth = Account::new(3, Platform::Anthropic, CredentialType::SetupToken);
        assert!(!should_hard_disable_401(
            &oauth,
            &HeaderMap::new(),
            br#"{"error":{"code":"invalid_api_key"}}"#
        ));
    }

    #[test]
    fn test_www_authenticate_needs_key_mention() {
        let account = apikey(Platform::Anthropic, "");
        let mut headers = HeaderMap::new();
        headers.insert("www-authenticate", HeaderValue::from_static("Bearer error=\"invalid_token\""));
        assert!(!should_hard_disable_401(&account, &headers, br#"{"error":{"message":"denied"}}"#));
        assert!(should_hard_disable_401(
            &account,
            &headers,
            br#"{"error":{"message":"the x-api-key header was rejected"}}"#
        ));
    }
}
