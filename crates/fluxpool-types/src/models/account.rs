//! Account model and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::health::SessionWindow;

/// Upstream provider an account belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Antigravity,
}

impl Platform {
    /// Stable lowercase identifier used in storage and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Antigravity => "antigravity",
        }
    }

    /// Human-readable label used in operator-facing reasons.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
            Self::Antigravity => "Antigravity",
        }
    }

    /// Parse from the storage identifier.
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            "antigravity" => Some(Self::Antigravity),
            _ => None,
        }
    }

    /// Host of the provider's first-party API, if it has one.
    pub const fn official_api_host(&self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("api.anthropic.com"),
            Self::OpenAi => Some("api.openai.com"),
            Self::Gemini => Some("generativelanguage.googleapis.com"),
            Self::Antigravity => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the account authenticates against its upstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialType {
    #[default]
    #[serde(rename = "oauth")]
    OAuth,
    SetupToken,
    #[serde(rename = "apikey")]
    ApiKey,
}

impl CredentialType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::SetupToken => "setup-token",
            Self::ApiKey => "apikey",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oauth" => Some(Self::OAuth),
            "setup-token" | "setup_token" => Some(Self::SetupToken),
            "apikey" | "api_key" | "api-key" => Some(Self::ApiKey),
            _ => None,
        }
    }

    /// OAuth and setup-token credentials are both token-based logins.
    pub const fn is_oauth_like(&self) -> bool {
        matches!(self, Self::OAuth | Self::SetupToken)
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative lifecycle status of an account row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Disabled,
    Error,
}

impl AccountStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "disabled" => Self::Disabled,
            "error" => Self::Error,
            _ => Self::Active,
        }
    }
}

/// Operator-defined override rule matched against upstream error responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CustomRule {
    /// HTTP status code the rule applies to
    pub error_code: u16,
    /// Case-insensitive substrings searched in the response body
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Pause length; rules with a non-positive duration never fire
    #[serde(default)]
    pub duration_minutes: i64,
    /// Free-form operator note prepended to the stored reason
    #[serde(default)]
    pub description: String,
}

/// Pooled upstream account as seen by the health core.
///
/// Only the fields the health state machine reads or mutates are modelled here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Account {
    /// Numeric primary key
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Upstream provider
    pub platform: Platform,
    /// Credential kind
    pub credential_type: CredentialType,
    /// Administrative status
    #[serde(default)]
    pub status: AccountStatus,
    /// Custom upstream base URL (apikey accounts only; empty means official)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    /// Hard dispatch switch; only permanent disable or an operator clears it
    pub schedulable: bool,
    /// Optional credential expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last permanent-disable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Upstream-confirmed rate-limit reset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    /// Overload cooldown end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overloaded_until: Option<DateTime<Utc>>,
    /// Temporary pause end (extend-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_unschedulable_until: Option<DateTime<Utc>>,
    /// Temporary pause reason; may hold a serialized `TempUnschedState`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub temp_unschedulable_reason: String,
    /// Provider session window (e.g. Anthropic's unified 5h window)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_window: Option<SessionWindow>,
    /// Probe-derived usage snapshot and other provider extras
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Ordered override rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_rules: Vec<CustomRule>,
    /// Status codes this apikey account wants handled; `None` handles everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_error_codes: Option<Vec<u16>>,
}

impl Account {
    /// Create a schedulable account with no health state.
    pub fn new(id: i64, platform: Platform, credential_type: CredentialType) -> Self {
        Self { id, platform, credential_type, schedulable: true, ..Self::default() }
    }

    /// Whether a health transition should be derived for this status code.
    ///
    /// Only apikey accounts can opt out through an allowlist.
    pub fn should_handle_error_code(&self, status_code: u16) -> bool {
        if self.credential_type != CredentialType::ApiKey {
            return true;
        }
        match &self.custom_error_codes {
            Some(codes) => codes.contains(&status_code),
            None => true,
        }
    }

    /// Whether an upstream rate limit is still in force at `now`.
    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limit_reset_at.is_some_and(|reset| reset > now)
    }

    pub fn is_overloaded(&self, now: DateTime<Utc>) -> bool {
        self.overloaded_until.is_some_and(|until| until > now)
    }

    pub fn is_temp_unschedulable(&self, now: DateTime<Utc>) -> bool {
        self.temp_unschedulable_until.is_some_and(|until| until > now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Dispatchable right now: switched on and not inside any cooldown.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.schedulable
            && self.status == AccountStatus::Active
            && !self.is_expired(now)
            && !self.is_rate_limited(now)
            && !self.is_overloaded(now)
            && !self.is_temp_unschedulable(now)
    }
}
