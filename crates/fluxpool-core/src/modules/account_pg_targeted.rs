//! Targeted (single-column) update operations for PostgreSQL accounts.
//!
//! These avoid full-row read-modify-write, eliminating race conditions
//! when concurrent operations update different fields on the same account.
//! Cooldown timestamps are only ever extended while they are in the future.

use crate::modules::account_pg_helpers::{expect_one_row, map_sqlx_err};
use crate::modules::repository::{RepoResult, RepositoryError};
use chrono::{DateTime, Utc};
use fluxpool_types::SessionWindow;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub(crate) async fn set_rate_limited_impl(
    pool: &PgPool,
    id: i64,
    reset_at: DateTime<Utc>,
) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts SET
            rate_limit_reset_at = CASE
                WHEN rate_limit_reset_at IS NULL
                  OR rate_limit_reset_at <= NOW()
                  OR rate_limit_reset_at < $2
                THEN $2 ELSE rate_limit_reset_at END,
            rate_limited_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(reset_at)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn clear_rate_limit_impl(pool: &PgPool, id: i64) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET rate_limit_reset_at = NULL, rate_limited_at = NULL, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn set_overloaded_impl(
    pool: &PgPool,
    id: i64,
    until: DateTime<Utc>,
) -> RepoResult<()> {
    let result = sqlx::query(
        "UPDATE accounts SET overloaded_until = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(until)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

/// Extend-only write; both columns move together or not at all.
pub(crate) async fn set_temp_unschedulable_impl(
    pool: &PgPool,
    id: i64,
    until: DateTime<Utc>,
    reason: &str,
) -> RepoResult<bool> {
    let row = sqlx::query(
        r#"
        WITH target AS (
            SELECT id,
                   (temp_unschedulable_until IS NULL
                    OR temp_unschedulable_until <= NOW()
                    OR temp_unschedulable_until < $2) AS applies
            FROM accounts
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
        )
        UPDATE accounts a SET
            temp_unschedulable_until = CASE WHEN t.applies THEN $2 ELSE a.temp_unschedulable_until END,
            temp_unschedulable_reason = CASE WHEN t.applies THEN $3 ELSE a.temp_unschedulable_reason END,
            updated_at = CASE WHEN t.applies THEN NOW() ELSE a.updated_at END
        FROM target t
        WHERE a.id = t.id
        RETURNING t.applies
        "#,
    )
    .bind(id)
    .bind(until)
    .bind(reason)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)?
    .ok_or(RepositoryError::NotFound(id))?;

    Ok(row.get("applies"))
}

pub(crate) async fn clear_temp_unschedulable_impl(pool: &PgPool, id: i64) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET temp_unschedulable_until = NULL, temp_unschedulable_reason = NULL, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn set_error_impl(pool: &PgPool, id: i64, message: &str) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET status = 'error', schedulable = FALSE, error_message = $2, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn set_unschedulable_with_reason_impl(
    pool: &PgPool,
    id: i64,
    reason: &str,
) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET schedulable = FALSE, error_message = $2, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn set_schedulable_impl(pool: &PgPool, id: i64, schedulable: bool) -> RepoResult<()> {
    let result = sqlx::query(
        "UPDATE accounts SET schedulable = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(schedulable)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn update_session_window_impl(
    pool: &PgPool,
    id: i64,
    window: &SessionWindow,
) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET session_window_start = $2, session_window_end = $3, session_window_status = $4,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(window.start)
    .bind(window.end)
    .bind(window.status.as_str())
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}

pub(crate) async fn update_extra_impl(
    pool: &PgPool,
    id: i64,
    updates: &serde_json::Map<String, serde_json::Value>,
) -> RepoResult<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET extra = COALESCE(extra, '{}'::jsonb) || $2::jsonb, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(serde_json::Value::Object(updates.clone()))
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    expect_one_row(&result, id)
}
