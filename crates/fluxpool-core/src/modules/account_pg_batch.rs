//! Idempotent batch statements run by the periodic jobs.

use crate::modules::account_pg_helpers::map_sqlx_err;
use crate::modules::repository::RepoResult;
use sqlx::postgres::PgPool;

pub(crate) async fn expire_accounts_impl(pool: &PgPool) -> RepoResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET schedulable = FALSE, updated_at = NOW()
        WHERE deleted_at IS NULL
          AND schedulable = TRUE
          AND expires_at IS NOT NULL
          AND expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    Ok(result.rows_affected())
}

pub(crate) async fn expire_subscriptions_impl(pool: &PgPool) -> RepoResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE user_subscriptions
        SET status = 'expired', updated_at = NOW()
        WHERE status = 'active' AND expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;

    Ok(result.rows_affected())
}
