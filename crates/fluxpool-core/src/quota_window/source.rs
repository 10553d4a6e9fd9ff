//! Where usage windows come from.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use fluxpool_types::{Account, Platform, UsageInfo};
use thiserror::Error;

use super::codex::codex_usage_windows;
use super::UsageWindow;

#[derive(Debug, Error)]
pub enum UsageFetchError {
    /// Upstream answered with a failure status; fed back into the classifier.
    #[error("Upstream returned {status_code}")]
    Upstream {
        status_code: u16,
        headers: HeaderMap,
        body: Vec<u8>,
    },

    #[error("Usage request failed: {0}")]
    Transport(String),

    #[error("Usage is not available for {0}")]
    Unsupported(&'static str),
}

/// Fetches a generic usage snapshot from a provider usage endpoint.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch_usage(&self, account: &Account) -> Result<UsageInfo, UsageFetchError>;
}

/// One capability behind which every platform's usage representation sits.
#[async_trait]
pub trait UsageWindowSource: Send + Sync {
    async fn usage_windows(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<UsageWindow>, UsageFetchError>;
}

/// Named windows with absolute resets from a [`UsageFetcher`].
pub struct GenericUsageSource {
    fetcher: Arc<dyn UsageFetcher>,
}

impl GenericUsageSource {
    pub fn new(fetcher: Arc<dyn UsageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn windows_from_info(info: &UsageInfo) -> Vec<UsageWindow> {
        [("5h", info.five_hour), ("7d", info.seven_day), ("7d_sonnet", info.seven_day_sonnet)]
            .into_iter()
            .filter_map(|(name, progress)| {
                progress.map(|p| UsageWindow::new(name, p.utilization, p.resets_at))
            })
            .collect()
    }
}

#[async_trait]
impl UsageWindowSource for GenericUsageSource {
    async fn usage_windows(
        &self,
        account: &Account,
        _now: DateTime<Utc>,
    ) -> Result<Vec<UsageWindow>, UsageFetchError> {
        let info = self.fetcher.fetch_usage(account).await?;
        Ok(Self::windows_from_info(&info))
    }
}

/// Probe-derived windows stored in `account.extra`. Performs no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexUsageSource;

#[async_trait]
impl UsageWindowSource for CodexUsageSource {
    async fn usage_windows(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<UsageWindow>, UsageFetchError> {
        Ok(codex_usage_windows(&account.extra, now))
    }
}

/// Picks the source by account platform: OpenAI reads the Codex snapshot,
/// everything else asks the usage endpoint.
pub struct PlatformUsageSource {
    generic: Option<GenericUsageSource>,
    codex: CodexUsageSource,
}

impl PlatformUsageSource {
    pub fn new(fetcher: Option<Arc<dyn UsageFetcher>>) -> Self {
        Self { generic: fetcher.map(GenericUsageSource::new), codex: CodexUsageSource }
    }
}

#[async_trait]
impl UsageWindowSource for PlatformUsageSource {
    async fn usage_windows(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<UsageWindow>, UsageFetchError> {
        match account.platform {
            Platform::OpenAi => self.codex.usage_windows(account, now).await,
            platform => match &self.generic {
                Some(generic) => generic.usage_windows(account, now).await,
                None => Err(UsageFetchError::Unsupported(platform.as_str())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fluxpool_types::{CredentialType, UsageProgress};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    struct StaticFetcher(UsageInfo);

    #[async_trait]
    impl UsageFetcher for StaticFetcher {
        async fn fetch_usage(&self, _account: &Account) -> Result<UsageInfo, UsageFetchError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_windows_from_info_skips_missing() {
        let info = UsageInfo {
            five_hour: Some(UsageProgress { utilization: 42.0, resets_at: None }),
            seven_day: None,
            seven_day_sonnet: Some(UsageProgress { utilization: 5.0, resets_at: None }),
        };
        let names: Vec<_> =
            GenericUsageSource::windows_from_info(&info).into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["5h", "7d_sonnet"]);
    }

    #[tokio::test]
    async fn test_platform_selection() {
        let reset = now() + Duration::hours(1);
        let fetcher: Arc<dyn UsageFetcher> = Arc::new(StaticFetcher(UsageInfo {
            five_hour: Some(UsageProgress { utilization: 10.0, resets_at: Some(reset) }),
            ..UsageInfo::default()
        }));
        let source = PlatformUsageSource::new(Some(fetcher));

        let anthropic = Account::new(1, Platform::Anthropic, CredentialType::OAuth);
        let windows = source.usage_windows(&anthropic, now()).await.unwrap();
        assert_eq!(windows, vec![UsageWindow::new("5h", 10.0, Some(reset))]);

        let mut openai = Account::new(2, Platform::OpenAi, CredentialType::OAuth);
        openai.extra.insert("codex_5h_used_percent".into(), serde_json::json!(80));
        openai.extra.insert("codex_5h_reset_after_seconds".into(), serde_json::json!(600));
        let windows = source.usage_windows(&openai, now()).await.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].name, "5h");
    }

    #[tokio::test]
    async fn test_missing_fetcher_is_unsupported() {
        let source = PlatformUsageSource::new(None);
        let gemini = Account::new(3, Platform::Gemini, CredentialType::OAuth);
        let err = source.usage_windows(&gemini, now()).await.unwrap_err();
        assert!(matches!(err, UsageFetchError::Unsupported("gemini")));
    }
}
