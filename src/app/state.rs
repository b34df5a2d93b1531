//! Typed access to the persisted reconciliation state: user identity,
//! pending-sync queue and sync status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{bookmarks::BookmarkRecord, eid::Eid, storage::StorageManager};

use super::errors::AppError;

const USER_KEY: &str = "user.json";
const PENDING_KEY: &str = "pending-sync.json";
const STATUS_KEY: &str = "sync-status.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running {
        session: Eid,
        started_at: DateTime<Utc>,
    },
}

impl SyncStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncStatus::Running { .. })
    }
}

#[derive(Clone)]
pub struct SyncStore {
    storage: Arc<dyn StorageManager>,
}

impl SyncStore {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage }
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        if !self.storage.exists(key) {
            return Ok(None);
        }
        let data = self.storage.read(key)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let data = serde_json::to_vec_pretty(value)?;
        Ok(self.storage.write(key, &data)?)
    }

    pub fn user(&self) -> Result<Option<UserIdentity>, AppError> {
        self.get(USER_KEY)
    }

    pub fn require_user(&self) -> Result<UserIdentity, AppError> {
        self.user()?.ok_or(AppError::NotSignedIn)
    }

    pub fn set_user(&self, user: &UserIdentity) -> Result<(), AppError> {
        self.put(USER_KEY, user)
    }

    pub fn pending(&self) -> Result<Vec<BookmarkRecord>, AppError> {
        Ok(self.get(PENDING_KEY)?.unwrap_or_default())
    }

    pub fn set_pending(&self, records: &[BookmarkRecord]) -> Result<(), AppError> {
        self.put(PENDING_KEY, &records)
    }

    pub fn status(&self) -> Result<SyncStatus, AppError> {
        Ok(self.get(STATUS_KEY)?.unwrap_or_default())
    }

    pub fn set_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        self.put(STATUS_KEY, status)
    }

    /// Force the status back to idle, returning what it was.
    pub fn reset_status(&self) -> Result<SyncStatus, AppError> {
        let previous = self.status()?;
        self.set_status(&SyncStatus::Idle)?;
        log::info!("sync status reset (was {previous:?})");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendMemory;

    #[test]
    fn test_defaults_when_nothing_persisted() {
        let store = SyncStore::new(Arc::new(BackendMemory::new()));

        assert_eq!(store.status().unwrap(), SyncStatus::Idle);
        assert!(store.pending().unwrap().is_empty());
        assert!(matches!(store.require_user(), Err(AppError::NotSignedIn)));
    }

    #[test]
    fn test_status_survives_reload() {
        let storage = Arc::new(BackendMemory::new());
        let store = SyncStore::new(storage.clone());
        let status = SyncStatus::Running {
            session: Eid::from("01J0000000000000000000000"),
            started_at: Utc::now(),
        };
        store.set_status(&status).unwrap();

        let reopened = SyncStore::new(storage);
        assert_eq!(reopened.status().unwrap(), status);
    }
}
