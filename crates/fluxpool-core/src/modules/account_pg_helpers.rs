//! Helper functions for PostgreSQL account operations.

use crate::modules::repository::{RepoResult, RepositoryError};
use fluxpool_types::{
    Account, AccountStatus, CredentialType, CustomRule, Platform, SessionWindow,
    SessionWindowStatus,
};
use sqlx::Row;

/// Columns read by [`row_to_account`].
pub(crate) const ACCOUNT_COLUMNS: &str = r#"
    id, name, platform, credential_type, status, base_url, schedulable, expires_at,
    error_message, rate_limit_reset_at, overloaded_until, temp_unschedulable_until,
    temp_unschedulable_reason, session_window_start, session_window_end,
    session_window_status, extra, custom_rules, custom_error_codes
"#;

/// Convert a PostgreSQL row to an Account struct.
pub(crate) fn row_to_account(row: &sqlx::postgres::PgRow) -> RepoResult<Account> {
    let id: i64 = row.get("id");

    let platform_raw: String = row.get("platform");
    let platform = Platform::from_string(&platform_raw).ok_or_else(|| {
        RepositoryError::Serialization(format!("account {id}: unknown platform '{platform_raw}'"))
    })?;
    let credential_raw: String = row.get("credential_type");
    let credential_type = CredentialType::from_string(&credential_raw).ok_or_else(|| {
        RepositoryError::Serialization(format!(
            "account {id}: unknown credential type '{credential_raw}'"
        ))
    })?;
    let status: String = row.get("status");

    let window_start: Option<chrono::DateTime<chrono::Utc>> = row.get("session_window_start");
    let window_end: Option<chrono::DateTime<chrono::Utc>> = row.get("session_window_end");
    let window_status: Option<String> = row.get("session_window_status");
    let session_window = match (window_start, window_end) {
        (Some(start), Some(end)) => Some(SessionWindow {
            start,
            end,
            status: window_status
                .as_deref()
                .and_then(SessionWindowStatus::from_string)
                .unwrap_or_default(),
        }),
        _ => None,
    };

    let extra = match row.get::<Option<serde_json::Value>, _>("extra") {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let custom_rules: Vec<CustomRule> = match row.get::<Option<serde_json::Value>, _>("custom_rules") {
        Some(value) if !value.is_null() => serde_json::from_value(value)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?,
        _ => Vec::new(),
    };
    let custom_error_codes: Option<Vec<u16>> =
        match row.get::<Option<serde_json::Value>, _>("custom_error_codes") {
            Some(value) if !value.is_null() => Some(
                serde_json::from_value(value)
                    .map_err(|err| RepositoryError::Serialization(err.to_string()))?,
            ),
            _ => None,
        };

    Ok(Account {
        id,
        name: row.get("name"),
        platform,
        credential_type,
        status: AccountStatus::from_string(&status),
        base_url: row.get::<Option<String>, _>("base_url").unwrap_or_default(),
        schedulable: row.get("schedulable"),
        expires_at: row.get("expires_at"),
        error_message: row.get("error_message"),
        rate_limit_reset_at: row.get("rate_limit_reset_at"),
        overloaded_until: row.get("overloaded_until"),
        temp_unschedulable_until: row.get("temp_unschedulable_until"),
        temp_unschedulable_reason: row
            .get::<Option<String>, _>("temp_unschedulable_reason")
            .unwrap_or_default(),
        session_window,
        extra,
        custom_rules,
        custom_error_codes,
    })
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(err.to_string())
}

/// Single-row write that must hit a live account.
pub(crate) fn expect_one_row(result: &sqlx::postgres::PgQueryResult, id: i64) -> RepoResult<()> {
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(id));
    }
    Ok(())
}
