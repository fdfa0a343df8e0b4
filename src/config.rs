//! Builder and file-loadable settings for the save core.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backup::{BackupPolicy, DEFAULT_KEY_PREFIX, EmergencyBackupService};
use crate::clock::{Clock, SystemClock};
use crate::coordinator::SaveCoordinator;
use crate::error::{DraftKeeperError, Result};
use crate::keeper::DraftKeeper;
use crate::notify::{Notifier, TracingNotifier};
use crate::storage::{BackupStorage, DocumentStore};

/// Settings that can live in a JSON file next to the application's other
/// preferences. Missing fields take their defaults.
///
/// ```
/// use draft_keeper::KeeperConfig;
///
/// let config = KeeperConfig::from_json(r#"{ "checkIntervalMs": 2000 }"#).unwrap();
/// assert_eq!(config.check_interval_ms, 2000);
/// assert_eq!(config.recovery_window_secs, 3600);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeeperConfig {
    pub check_interval_ms: u64,
    pub recovery_window_secs: u64,
    pub retention_secs: u64,
    pub backup_prefix: String,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        let policy = BackupPolicy::default();
        Self {
            check_interval_ms: 1000,
            recovery_window_secs: policy.recovery_window.as_secs(),
            retention_secs: policy.retention.as_secs(),
            backup_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl KeeperConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading draft keeper config from {}", path.display());
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(DraftKeeperError::Config(
                "checkIntervalMs must be positive".into(),
            ));
        }
        if self.recovery_window_secs == 0 {
            return Err(DraftKeeperError::Config(
                "recoveryWindowSecs must be positive".into(),
            ));
        }
        if self.retention_secs < self.recovery_window_secs {
            return Err(DraftKeeperError::Config(
                "retentionSecs must not be shorter than recoveryWindowSecs".into(),
            ));
        }
        if self.backup_prefix.is_empty() || self.backup_prefix.contains(['/', '\\']) {
            return Err(DraftKeeperError::Config(format!(
                "invalid backupPrefix {:?}",
                self.backup_prefix
            )));
        }
        Ok(())
    }
}

/// Builder for a [`DraftKeeper`].
///
/// # Example
///
/// ```rust,no_run
/// use draft_keeper::{DraftKeeperBuilder, FsBackupStorage, FsDocumentStore};
/// use std::time::Duration;
///
/// let keeper = DraftKeeperBuilder::new(
///     FsDocumentStore::new("/home/me/novel/manuscript"),
///     FsBackupStorage::new("/home/me/.novel/.emergency_backups"),
/// )
/// .check_interval(Duration::from_millis(500))
/// .recovery_window(Duration::from_secs(30 * 60))
/// .build();
/// ```
pub struct DraftKeeperBuilder<D: DocumentStore, B: BackupStorage> {
    store: D,
    backup_storage: B,
    check_interval: Duration,
    policy: BackupPolicy,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<D: DocumentStore, B: BackupStorage> DraftKeeperBuilder<D, B> {
    /// Create a new builder with the given primary store, backup medium and
    /// defaults.
    ///
    /// Defaults: check interval 1 s, recovery window 1 h, retention 7 days,
    /// key prefix `emergency_backup_`, [`TracingNotifier`], [`SystemClock`].
    pub fn new(store: D, backup_storage: B) -> Self {
        Self {
            store,
            backup_storage,
            check_interval: Duration::from_secs(1),
            policy: BackupPolicy::default(),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// How often a session checks for unsaved changes. Clamped to at least
    /// one millisecond.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Maximum backup age that is still offered for restoration.
    pub fn recovery_window(mut self, window: Duration) -> Self {
        self.policy.recovery_window = window;
        self
    }

    /// Age after which backups are purged by the cleanup sweep. Raised to the
    /// recovery window at build time if shorter, so the sweep at mount never
    /// removes a backup that could still be offered.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.policy.retention = retention;
        self
    }

    /// Prefix for backup keys.
    pub fn backup_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.policy.key_prefix = prefix.into();
        self
    }

    /// Where failure and recovery notices go.
    pub fn notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Time source for backup timestamps.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Apply every setting from a [`KeeperConfig`].
    pub fn config(self, config: &KeeperConfig) -> Self {
        self.check_interval(Duration::from_millis(config.check_interval_ms))
            .recovery_window(Duration::from_secs(config.recovery_window_secs))
            .retention(Duration::from_secs(config.retention_secs))
            .backup_prefix(config.backup_prefix.clone())
    }

    /// Consume the builder and assemble the [`DraftKeeper`]. Nothing is
    /// spawned until the first save or mount.
    pub fn build(mut self) -> DraftKeeper<D, B> {
        if self.policy.retention < self.policy.recovery_window {
            tracing::warn!(
                "Retention {:?} is shorter than the recovery window {:?}, using the window",
                self.policy.retention,
                self.policy.recovery_window
            );
            self.policy.retention = self.policy.recovery_window;
        }
        let backups =
            EmergencyBackupService::new(self.backup_storage, self.policy, Arc::clone(&self.clock));
        let coordinator = SaveCoordinator::new(
            self.store,
            backups,
            Arc::clone(&self.notifier),
            self.clock,
        );
        DraftKeeper::new(coordinator, self.notifier, self.check_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentUpdate, MemoryBackupStorage};

    struct NullStore;

    impl DocumentStore for NullStore {
        async fn update(&self, _document_id: &str, _update: &DocumentUpdate) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = KeeperConfig::default();
        config.validate().unwrap();
        assert_eq!(config.check_interval_ms, 1000);
        assert_eq!(config.recovery_window_secs, 3600);
        assert_eq!(config.retention_secs, 7 * 24 * 3600);
        assert_eq!(config.backup_prefix, "emergency_backup_");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = KeeperConfig::from_json(r#"{"retentionSecs": 86400}"#).unwrap();
        assert_eq!(config.retention_secs, 86400);
        assert_eq!(config.check_interval_ms, 1000);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = KeeperConfig::from_json(r#"{"checkIntervalMs": 0}"#).unwrap_err();
        assert!(matches!(err, DraftKeeperError::Config(_)));
    }

    #[test]
    fn retention_shorter_than_window_is_rejected() {
        let err = KeeperConfig::from_json(r#"{"recoveryWindowSecs": 7200, "retentionSecs": 3600}"#)
            .unwrap_err();
        assert!(matches!(err, DraftKeeperError::Config(_)));
    }

    #[test]
    fn prefix_with_separator_is_rejected() {
        let config = KeeperConfig {
            backup_prefix: "backups/".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn build_raises_retention_to_recovery_window() {
        let keeper = DraftKeeperBuilder::new(NullStore, MemoryBackupStorage::new())
            .recovery_window(Duration::from_secs(3600))
            .retention(Duration::from_secs(1))
            .build();
        assert_eq!(keeper.backups().policy().retention, Duration::from_secs(3600));

        let keeper = DraftKeeperBuilder::new(NullStore, MemoryBackupStorage::new())
            .retention(Duration::from_secs(2 * 24 * 3600))
            .build();
        assert_eq!(
            keeper.backups().policy().retention,
            Duration::from_secs(2 * 24 * 3600)
        );
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = KeeperConfig::from_json("{").unwrap_err();
        assert!(matches!(err, DraftKeeperError::Serialization(_)));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.json");
        std::fs::write(&path, r#"{"backupPrefix": "rescue_"}"#).unwrap();

        let config = KeeperConfig::from_file(&path).unwrap();
        assert_eq!(config.backup_prefix, "rescue_");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = KeeperConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DraftKeeperError::Io(_)));
    }
}
