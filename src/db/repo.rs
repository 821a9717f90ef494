use super::model::{MarketplaceAccount, SyncStatus};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and ensure the parent
/// directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rel), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rel),
        _ => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MarketplaceAccount> {
    let status_str: String = row.get("last_sync_status");
    let last_sync_status = SyncStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("account has unknown sync status {}", status_str))?;
    Ok(MarketplaceAccount {
        id: row.get("id"),
        student_id: row.get("student_id"),
        ml_user_id: row.try_get::<Option<String>, _>("ml_user_id").ok().flatten(),
        access_token: row.get("access_token"),
        refresh_token: row
            .try_get::<Option<String>, _>("refresh_token")
            .ok()
            .flatten()
            .filter(|s| !s.trim().is_empty()),
        expires_at: row.get("expires_at"),
        is_primary: row.get::<i64, _>("is_primary") != 0,
        is_active: row.get::<i64, _>("is_active") != 0,
        last_sync_status,
    })
}

/// The primary linked account for a student, if any.
#[instrument(skip_all)]
pub async fn primary_account_for_student(
    pool: &Pool,
    student_id: &str,
) -> Result<Option<MarketplaceAccount>> {
    let row = sqlx::query(
        "SELECT id, student_id, ml_user_id, access_token, refresh_token, expires_at, \
                is_primary, is_active, last_sync_status \
         FROM marketplace_accounts WHERE student_id = ? AND is_primary = 1 LIMIT 1",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(account_from_row).transpose()
}

/// Persist a successful token refresh: new tokens, new expiry, account back
/// to active/synced. Last writer wins.
#[instrument(skip_all)]
pub async fn update_account_tokens(
    pool: &Pool,
    account_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE marketplace_accounts \
         SET access_token = ?, refresh_token = COALESCE(?, refresh_token), expires_at = ?, \
             is_active = 1, last_sync_status = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .bind(SyncStatus::Synced.as_str())
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a failed token refresh: account goes inactive until the seller
/// reconnects it.
#[instrument(skip_all)]
pub async fn mark_reconnect_needed(pool: &Pool, account_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE marketplace_accounts \
         SET is_active = 0, last_sync_status = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(SyncStatus::ReconnectNeeded.as_str())
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a linked account row. Used by account-management plumbing and by
/// tests; the resolver itself only reads and updates.
#[instrument(skip_all)]
pub async fn insert_account(
    pool: &Pool,
    student_id: &str,
    ml_user_id: Option<&str>,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
    is_primary: bool,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO marketplace_accounts \
         (student_id, ml_user_id, access_token, refresh_token, expires_at, is_primary) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(student_id)
    .bind(ml_user_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .bind(is_primary as i64)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}
