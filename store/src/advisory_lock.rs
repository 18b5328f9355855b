//! Per-bucket advisory locking, the engine's only cross-process
//! coordination mechanism.

use sqlx::{PgPool, Row};
use tablewatch_core::domain::advisory_lock_key;

/// Attempts to acquire the transaction-scoped advisory lock for `bucket_id`.
/// Returns `false` without blocking if another session already holds it —
/// the caller MUST abort the tick rather than wait.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if the lock query itself fails.
pub async fn try_acquire_bucket_lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    bucket_id: &str,
) -> Result<bool, sqlx::Error> {
    let key = advisory_lock_key(bucket_id);
    let row = sqlx::query("SELECT pg_try_advisory_xact_lock($1)")
        .bind(key)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get::<bool, _>(0))
}

/// Starts a transaction on `pool`. Split out so callers can acquire the
/// advisory lock as the very first statement in the transaction, per the
/// poll worker's step ordering.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if beginning the transaction fails.
pub async fn begin(pool: &PgPool) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, sqlx::Error> {
    pool.begin().await
}
