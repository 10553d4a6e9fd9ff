//! Account query operations for PostgreSQL.

use crate::modules::account_pg_helpers::{map_sqlx_err, row_to_account, ACCOUNT_COLUMNS};
use crate::modules::repository::{RecoveryCandidate, RepoResult, RepositoryError};
use fluxpool_types::Account;
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Get a live account by ID.
pub(crate) async fn get_by_id_impl(pool: &PgPool, id: i64) -> RepoResult<Account> {
    let row = sqlx::query(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)?
    .ok_or(RepositoryError::NotFound(id))?;

    row_to_account(&row)
}

pub(crate) async fn list_schedulable_impl(pool: &PgPool) -> RepoResult<Vec<Account>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE deleted_at IS NULL AND status = 'active' AND schedulable = TRUE
        ORDER BY id
        "#
    ))
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    rows.iter().map(row_to_account).collect()
}

/// Usage-quota pauses ending within `window_secs`.
pub(crate) async fn list_temp_unsched_recovery_candidates_impl(
    pool: &PgPool,
    window_secs: i64,
) -> RepoResult<Vec<RecoveryCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT id, temp_unschedulable_until
        FROM accounts
        WHERE deleted_at IS NULL
          AND temp_unschedulable_until IS NOT NULL
          AND temp_unschedulable_until <= NOW() + ($1 * INTERVAL '1 second')
          AND (
                temp_unschedulable_reason ILIKE '%usage window exceeded%'
             OR temp_unschedulable_reason LIKE '%额度已超限%'
             OR temp_unschedulable_reason LIKE '%"rule_index":-2%'
          )
        ORDER BY temp_unschedulable_until
        "#,
    )
    .bind(window_secs)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    Ok(rows
        .iter()
        .map(|row| RecoveryCandidate {
            account_id: row.get("id"),
            until: row.get("temp_unschedulable_until"),
        })
        .filter(|c| c.account_id > 0)
        .collect())
}

pub(crate) async fn list_rate_limit_reactivation_candidates_impl(
    pool: &PgPool,
    limit: i64,
) -> RepoResult<Vec<Account>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE deleted_at IS NULL
          AND status = 'active'
          AND schedulable = FALSE
          AND rate_limit_reset_at IS NOT NULL
          AND rate_limit_reset_at <= NOW()
          AND COALESCE(temp_unschedulable_reason, '') ILIKE '%429%'
        ORDER BY rate_limit_reset_at
        LIMIT $1
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    rows.iter().map(row_to_account).collect()
}
