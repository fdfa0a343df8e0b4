//! The assembled save core.

use std::sync::Arc;
use std::time::Duration;

use crate::backup::EmergencyBackupService;
use crate::controller::{AutoSaveController, Editor, RecoveryPrompt};
use crate::coordinator::SaveCoordinator;
use crate::notify::Notifier;
use crate::storage::{BackupStorage, DocumentStore};

/// One [`SaveCoordinator`] and its [`EmergencyBackupService`], plus the
/// settings for auto-save sessions. Built with
/// [`DraftKeeperBuilder`](crate::DraftKeeperBuilder).
///
/// Create one per application and share it; every writer of a document must go
/// through the same coordinator for the per-document ordering to hold.
pub struct DraftKeeper<D, B> {
    coordinator: SaveCoordinator<D, B>,
    notifier: Arc<dyn Notifier>,
    check_interval: Duration,
}

impl<D, B> Clone for DraftKeeper<D, B> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            notifier: Arc::clone(&self.notifier),
            check_interval: self.check_interval,
        }
    }
}

impl<D: DocumentStore, B: BackupStorage> DraftKeeper<D, B> {
    pub(crate) fn new(
        coordinator: SaveCoordinator<D, B>,
        notifier: Arc<dyn Notifier>,
        check_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            notifier,
            check_interval,
        }
    }

    /// The coordinator, for writers other than auto-save (manual saves,
    /// generated text insertion).
    pub fn coordinator(&self) -> &SaveCoordinator<D, B> {
        &self.coordinator
    }

    pub fn backups(&self) -> &EmergencyBackupService<B> {
        self.coordinator.backups()
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Start an auto-save session for `document_id`.
    ///
    /// Sweeps expired backups (first mount per keeper only), offers a fresh
    /// backup for this document through `prompt`, deletes that backup whatever
    /// the answer, and starts the periodic check. Backup store failures are
    /// logged; mounting itself cannot fail.
    pub async fn mount<E: Editor, P: RecoveryPrompt>(
        &self,
        document_id: impl Into<String>,
        editor: Arc<E>,
        prompt: &P,
    ) -> AutoSaveController<D, B, E> {
        AutoSaveController::mount(
            document_id.into(),
            editor,
            prompt,
            self.coordinator.clone(),
            Arc::clone(&self.notifier),
            self.check_interval,
        )
        .await
    }
}
