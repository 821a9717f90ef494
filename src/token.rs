//! The two credential flows behind every upstream call.
//!
//! The application token is a process-wide single-slot cache refreshed via
//! the client-credentials grant; the actor token is read from (and written
//! back to) the linked-accounts table via the refresh-token grant. The two
//! are deliberately separate: resolution only needs the former, enrichment
//! opportunistically uses the latter.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::meli::MeliApi;
use crate::model::ResolveError;

/// Cached token is reused only while this much validity remains.
const APP_TOKEN_MARGIN_SECS: i64 = 60;
/// Actor tokens are refreshed proactively once inside this window.
const ACTOR_REFRESH_WINDOW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
struct CachedToken {
    bearer: String,
    expires_at: DateTime<Utc>,
}

/// Single-slot application token cache. Races between concurrent requests
/// are tolerated: the worst case is a redundant grant, which the upstream
/// token endpoint treats as idempotent per credential pair.
///
/// The current instant is supplied by the caller so expiry behavior is
/// testable against a fixed clock.
#[derive(Debug, Default)]
pub struct AppTokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl AppTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a valid application bearer token, performing a
    /// client-credentials grant when the cached one is absent or close to
    /// expiry. Grant failure is fatal for the request and is not retried.
    pub async fn bearer(&self, api: &dyn MeliApi, now: DateTime<Utc>) -> Result<String, ResolveError> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at - now > Duration::seconds(APP_TOKEN_MARGIN_SECS) {
                return Ok(cached.bearer.clone());
            }
        }

        let grant = api
            .client_credentials_grant()
            .await
            .map_err(|err| ResolveError::Credentials(err.to_string()))?;
        let cached = CachedToken {
            bearer: grant.access_token,
            expires_at: now + Duration::seconds(grant.expires_in),
        };
        info!(expires_at = %cached.expires_at, "refreshed application token");
        let bearer = cached.bearer.clone();
        *slot = Some(cached);
        Ok(bearer)
    }
}

/// Obtain an actor-scoped access token for the student's primary linked
/// account.
///
/// `Ok(None)` means "no actor privilege available" and is not an error:
/// callers proceed on the application token alone. An `Err` is only
/// returned when a refresh was attempted and rejected, in which case the
/// account has already been flagged for reconnection.
#[instrument(skip_all)]
pub async fn actor_token(
    pool: &Pool,
    api: &dyn MeliApi,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let Some(account) = db::primary_account_for_student(pool, student_id).await? else {
        return Ok(None);
    };

    if account.expires_at - now > Duration::seconds(ACTOR_REFRESH_WINDOW_SECS) {
        return Ok(Some(account.access_token));
    }

    let Some(refresh_token) = account.refresh_token.as_deref() else {
        // Expired with nothing to renew it with; the caller degrades.
        return Ok(None);
    };

    match api.refresh_grant(refresh_token).await {
        Ok(grant) => {
            let expires_at = now + Duration::seconds(grant.expires_in);
            db::update_account_tokens(
                pool,
                account.id,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                expires_at,
            )
            .await?;
            info!(account_id = account.id, "refreshed actor token");
            Ok(Some(grant.access_token))
        }
        Err(err) => {
            warn!(?err, account_id = account.id, "actor token refresh failed");
            db::mark_reconnect_needed(pool, account.id).await?;
            Err(err)
        }
    }
}
