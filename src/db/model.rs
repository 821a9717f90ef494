use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent token synchronization for a linked account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    ReconnectNeeded,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::ReconnectNeeded => "reconnect_needed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncStatus::Synced),
            "reconnect_needed" => Some(SyncStatus::ReconnectNeeded),
            _ => None,
        }
    }
}

/// A linked marketplace seller account. The resolver reads the row flagged
/// primary for a student and writes back renewed tokens or a failure status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceAccount {
    pub id: i64,
    pub student_id: String,
    pub ml_user_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_primary: bool,
    pub is_active: bool,
    pub last_sync_status: SyncStatus,
}
