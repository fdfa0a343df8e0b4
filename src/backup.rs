//! Emergency backups: a durable staging area for content that could not (yet)
//! reach the primary store.
//!
//! Records are keyed by document id and stamped with their creation time. A
//! record is offered for recovery while it is younger than the recovery window
//! and purged by [`EmergencyBackupService::cleanup_expired`] once it is older
//! than the retention period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::BackupStorage;

/// Default key prefix for backup records.
pub const DEFAULT_KEY_PREFIX: &str = "emergency_backup_";

/// A snapshot of in-progress content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub document_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl BackupRecord {
    /// Time elapsed since the record was created. Records stamped in the
    /// future (clock skew) have age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Whether the record is still young enough to offer for restoration.
    pub fn is_recoverable(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) < window
    }

    /// Whether the record has outlived the retention period.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.age(now) > retention
    }
}

/// Retention rules and key shape for emergency backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPolicy {
    /// Records younger than this are offered for recovery on mount.
    pub recovery_window: Duration,
    /// Records older than this are removed by the cleanup sweep.
    pub retention: Duration,
    /// Prepended to the document id to form the storage key.
    pub key_prefix: String,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            recovery_window: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Policy layer over a [`BackupStorage`] medium.
///
/// Cloning is cheap; clones share the storage and the once-per-session sweep
/// flag.
pub struct EmergencyBackupService<B> {
    storage: Arc<B>,
    policy: Arc<BackupPolicy>,
    clock: Arc<dyn Clock>,
    swept: Arc<AtomicBool>,
}

impl<B> Clone for EmergencyBackupService<B> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            policy: Arc::clone(&self.policy),
            clock: Arc::clone(&self.clock),
            swept: Arc::clone(&self.swept),
        }
    }
}

impl<B: BackupStorage> EmergencyBackupService<B> {
    pub fn new(storage: B, policy: BackupPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: Arc::new(storage),
            policy: Arc::new(policy),
            clock,
            swept: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> &BackupPolicy {
        &self.policy
    }

    /// Current time according to the service's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Direct access to the underlying medium.
    pub fn storage(&self) -> &B {
        &self.storage
    }

    fn key(&self, document_id: &str) -> String {
        format!("{}{}", self.policy.key_prefix, document_id)
    }

    /// Store `content` as the backup of `document_id`, replacing any earlier
    /// one.
    ///
    /// This is the last line of defense after a failed primary write, so it
    /// never fails: storage and serialization errors are logged and dropped.
    pub async fn save_backup(&self, document_id: &str, content: impl Into<String>) {
        let record = BackupRecord {
            document_id: document_id.to_string(),
            content: content.into(),
            created_at: self.clock.now(),
        };
        match self.write_record(&record).await {
            Ok(()) => tracing::debug!(
                "Stored emergency backup for '{document_id}' ({} bytes)",
                record.content.len()
            ),
            Err(e) => tracing::error!("Failed to store emergency backup for '{document_id}': {e}"),
        }
    }

    async fn write_record(&self, record: &BackupRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.storage.set(&self.key(&record.document_id), &bytes).await
    }

    /// Fire-and-forget variant of [`save_backup`](Self::save_backup) for unload
    /// handlers that cannot await.
    ///
    /// The write runs on a spawned task. There is no guarantee it completes if
    /// the process exits first; await the returned handle when you can afford
    /// to.
    pub fn save_backup_detached(
        &self,
        document_id: impl Into<String>,
        content: impl Into<String>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        let document_id = document_id.into();
        let content = content.into();
        tokio::spawn(async move { service.save_backup(&document_id, content).await })
    }

    /// Fetch the backup for `document_id`, if any.
    ///
    /// Unreadable records, or records filed under the wrong id, are treated as
    /// absent and removed.
    pub async fn get_backup(&self, document_id: &str) -> Result<Option<BackupRecord>> {
        let key = self.key(document_id);
        let Some(bytes) = self.storage.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<BackupRecord>(&bytes) {
            Ok(record) if record.document_id == document_id => Ok(Some(record)),
            Ok(record) => {
                tracing::warn!(
                    "Backup under key {key} belongs to '{}', discarding",
                    record.document_id
                );
                self.discard(&key).await;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Backup under key {key} is unreadable, discarding: {e}");
                self.discard(&key).await;
                Ok(None)
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!("Failed to remove backup {key}: {e}");
        }
    }

    /// Remove the backup for `document_id`. Removing a missing backup is a
    /// no-op.
    pub async fn delete_backup(&self, document_id: &str) -> Result<()> {
        self.storage.delete(&self.key(document_id)).await
    }

    /// Remove every record older than the retention period, plus any record
    /// that can no longer be decoded. Returns how many were removed.
    ///
    /// Failures on individual records are logged and skipped; only a failure to
    /// list the medium is returned.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let keys = self.storage.list(&self.policy.key_prefix).await?;
        let mut removed = 0;

        for key in keys {
            let bytes = match self.storage.get(&key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping backup {key} during cleanup: {e}");
                    continue;
                }
            };

            let stale = match serde_json::from_slice::<BackupRecord>(&bytes) {
                Ok(record) => record.is_expired(now, self.policy.retention),
                Err(_) => true,
            };
            if !stale {
                continue;
            }

            match self.storage.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove expired backup {key}: {e}"),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {removed} expired emergency backups");
        }
        Ok(removed)
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) the first time it is
    /// called on this service (or any clone of it); later calls return `None`
    /// without touching storage. A failed sweep is logged and also yields
    /// `None`.
    pub async fn cleanup_expired_once(&self) -> Option<usize> {
        if self.swept.swap(true, Ordering::SeqCst) {
            return None;
        }
        match self.cleanup_expired().await {
            Ok(removed) => Some(removed),
            Err(e) => {
                tracing::warn!("Emergency backup cleanup failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackupStorage;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn service() -> (
        EmergencyBackupService<MemoryBackupStorage>,
        Arc<FixedClock>,
        MemoryBackupStorage,
    ) {
        let clock = Arc::new(FixedClock(Mutex::new(t0())));
        let storage = MemoryBackupStorage::new();
        let service = EmergencyBackupService::new(
            storage.clone(),
            BackupPolicy::default(),
            clock.clone(),
        );
        (service, clock, storage)
    }

    fn record_at(created_at: DateTime<Utc>) -> BackupRecord {
        BackupRecord {
            document_id: "scene-1".into(),
            content: "draft".into(),
            created_at,
        }
    }

    #[test]
    fn recovery_window_is_exclusive() {
        let hour = Duration::from_secs(3600);
        let record = record_at(t0());
        assert!(record.is_recoverable(t0() + chrono::Duration::minutes(59), hour));
        assert!(!record.is_recoverable(t0() + chrono::Duration::minutes(60), hour));
        assert!(!record.is_recoverable(t0() + chrono::Duration::minutes(61), hour));
    }

    #[test]
    fn future_records_have_zero_age() {
        let record = record_at(t0() + chrono::Duration::minutes(5));
        assert_eq!(record.age(t0()), Duration::ZERO);
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record_at(t0())).unwrap();
        assert_eq!(json["documentId"], "scene-1");
        assert_eq!(json["createdAt"], "2024-03-01T09:00:00Z");
    }

    #[tokio::test]
    async fn save_then_get_uses_prefixed_key() {
        let (service, _clock, storage) = service();
        service.save_backup("scene-1", "draft").await;

        assert!(storage.get("emergency_backup_scene-1").await.unwrap().is_some());
        let record = service.get_backup("scene-1").await.unwrap().unwrap();
        assert_eq!(record.content, "draft");
        assert_eq!(record.created_at, t0());
    }

    #[tokio::test]
    async fn later_backup_replaces_earlier_one() {
        let (service, clock, _storage) = service();
        service.save_backup("scene-1", "first").await;
        clock.set(t0() + chrono::Duration::seconds(30));
        service.save_backup("scene-1", "second").await;

        let record = service.get_backup("scene-1").await.unwrap().unwrap();
        assert_eq!(record.content, "second");
        assert_eq!(record.created_at, t0() + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn corrupt_record_is_dropped() {
        let (service, _clock, storage) = service();
        storage
            .set("emergency_backup_scene-1", b"{not json")
            .await
            .unwrap();

        assert!(service.get_backup("scene-1").await.unwrap().is_none());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let (service, clock, storage) = service();
        service.save_backup("old-a", "a").await;
        service.save_backup("old-b", "b").await;
        clock.set(t0() + chrono::Duration::days(6));
        service.save_backup("recent", "c").await;
        storage.set("unrelated", b"keep me").await.unwrap();

        clock.set(t0() + chrono::Duration::days(8));
        assert_eq!(service.cleanup_expired().await.unwrap(), 2);
        assert!(service.get_backup("recent").await.unwrap().is_some());
        assert!(storage.get("unrelated").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_once_runs_a_single_sweep() {
        let (service, clock, _storage) = service();
        service.save_backup("old", "a").await;
        clock.set(t0() + chrono::Duration::days(30));

        let clone = service.clone();
        assert_eq!(service.cleanup_expired_once().await, Some(1));
        assert_eq!(clone.cleanup_expired_once().await, None);
    }
}
