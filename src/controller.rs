//! Auto-save for one editing session.
//!
//! An [`AutoSaveController`] sits between an [`Editor`] and the
//! [`SaveCoordinator`]. Change notifications only raise a dirty flag; a
//! background worker checks the flag at a fixed interval and flushes through
//! the coordinator. Bursts of keystrokes therefore cost one save per interval,
//! without a timer being restarted per keystroke.
//!
//! ```text
//!  change          check tick           Ok
//! Idle ──▶ Dirty ──────────────▶ Saving ────▶ Idle
//!            ▲                     │
//!            └─────── Err ─────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::backup::{BackupRecord, EmergencyBackupService};
use crate::content::ContentSource;
use crate::coordinator::SaveCoordinator;
use crate::notify::{Notice, Notifier};
use crate::storage::{BackupStorage, DocumentStore};
use crate::worker;

/// The editing surface whose content is being protected.
pub trait Editor: Send + Sync + 'static {
    /// The current content. Must be cheap and must not block: it is also
    /// called from unload handlers.
    fn content_snapshot(&self) -> String;

    /// Replace the editor content, used when a backup is restored.
    fn apply_content(&self, content: &str);

    /// `false` once the editor has been torn down. A dead editor is never
    /// read from.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Asks the user whether to restore an emergency backup.
///
/// A backup is not removed when a later save succeeds, so the offered record
/// can be older than what the primary store already holds. Compare
/// [`BackupRecord::created_at`] with the document's last save time before
/// presenting it as newer.
pub trait RecoveryPrompt: Send + Sync {
    /// Resolve to `true` to restore `backup` into the editor.
    fn offer_restore(&self, backup: &BackupRecord) -> impl Future<Output = bool> + Send;
}

/// Where a session stands with respect to the primary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    /// Nothing unsaved.
    Idle,
    /// Changes observed, waiting for the next check.
    Dirty,
    /// A save is in flight.
    Saving,
}

/// What happened to the emergency backup found at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NoBackup,
    Restored,
    Declined,
    /// A backup existed but was older than the recovery window.
    Expired,
}

/// Result of [`AutoSaveController::handle_unload`].
#[derive(Debug)]
pub enum UnloadOutcome {
    /// Nothing unsaved; let the process go.
    Clean,
    /// There are unsaved changes; the host should ask the user to confirm
    /// leaving. `backup` is the detached backup write, or `None` when the
    /// editor is already gone and its content could not be read. Awaiting it
    /// is optional and may not finish if the process is already going down.
    ConfirmLeave { backup: Option<JoinHandle<()>> },
}

/// State shared between the controller, its edit signals and the worker.
pub(crate) struct SessionState {
    dirty: AtomicBool,
    attached: AtomicBool,
    phase: watch::Sender<SavePhase>,
}

impl SessionState {
    fn new() -> Self {
        let (phase, _) = watch::channel(SavePhase::Idle);
        Self {
            dirty: AtomicBool::new(false),
            attached: AtomicBool::new(true),
            phase,
        }
    }

    fn mark_changed(&self) {
        if !self.attached.load(Ordering::SeqCst) {
            return;
        }
        self.dirty.store(true, Ordering::SeqCst);
        self.phase.send_if_modified(|phase| {
            if *phase == SavePhase::Idle {
                *phase = SavePhase::Dirty;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clears the dirty flag and enters `Saving` if there was anything to save.
    pub(crate) fn begin_save(&self) -> bool {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.phase.send_replace(SavePhase::Saving);
        true
    }

    pub(crate) fn finish_save(&self, saved: bool) {
        if !saved {
            self.dirty.store(true, Ordering::SeqCst);
        }
        let next = if self.dirty.load(Ordering::SeqCst) {
            SavePhase::Dirty
        } else {
            SavePhase::Idle
        };
        self.phase.send_replace(next);
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

/// Handle given to the editor's change hook. Cloneable; becomes inert once the
/// controller is torn down.
#[derive(Clone)]
pub struct EditSignal {
    session: Arc<SessionState>,
}

impl EditSignal {
    /// Report that the document changed.
    pub fn changed(&self) {
        self.session.mark_changed();
    }
}

/// Reads the live editor content for the coordinator.
pub(crate) struct EditorContent<E>(pub(crate) Arc<E>);

impl<E: Editor> ContentSource for EditorContent<E> {
    fn snapshot(&self) -> String {
        self.0.content_snapshot()
    }
}

/// Auto-save session for a single document. Created by
/// [`DraftKeeper::mount`](crate::DraftKeeper::mount).
///
/// Call [`unmount`](Self::unmount) when the editor closes to flush pending
/// changes. Dropping the controller also flushes, but nothing waits for it.
pub struct AutoSaveController<D, B, E> {
    document_id: String,
    editor: Arc<E>,
    session: Arc<SessionState>,
    coordinator: SaveCoordinator<D, B>,
    backups: EmergencyBackupService<B>,
    recovery: RecoveryOutcome,
    swept: Option<usize>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl<D: DocumentStore, B: BackupStorage, E: Editor> AutoSaveController<D, B, E> {
    pub(crate) async fn mount<P: RecoveryPrompt>(
        document_id: String,
        editor: Arc<E>,
        prompt: &P,
        coordinator: SaveCoordinator<D, B>,
        notifier: Arc<dyn Notifier>,
        check_interval: Duration,
    ) -> Self {
        let backups = coordinator.backups().clone();
        let swept = backups.cleanup_expired_once().await;

        let session = Arc::new(SessionState::new());
        let recovery = recover(&document_id, &*editor, prompt, &backups, &*notifier).await;
        if recovery == RecoveryOutcome::Restored {
            // The restored text only lives in the editor so far.
            session.mark_changed();
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(worker::run(
            shutdown_rx,
            Arc::clone(&session),
            coordinator.clone(),
            Arc::clone(&editor),
            document_id.clone(),
            check_interval,
        ));

        tracing::info!("Auto-save mounted for '{document_id}' ({recovery:?})");

        Self {
            document_id,
            editor,
            session,
            coordinator,
            backups,
            recovery,
            swept,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// A handle for the editor's change hook.
    pub fn edit_signal(&self) -> EditSignal {
        EditSignal {
            session: Arc::clone(&self.session),
        }
    }

    /// Report that the document changed. Equivalent to
    /// [`EditSignal::changed`].
    pub fn mark_changed(&self) {
        self.session.mark_changed();
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.session.has_unsaved_changes()
    }

    pub fn phase(&self) -> SavePhase {
        *self.session.phase.borrow()
    }

    /// Watch phase transitions, e.g. to drive a "saving..." indicator.
    pub fn subscribe(&self) -> watch::Receiver<SavePhase> {
        self.session.phase.subscribe()
    }

    /// Whether the coordinator has a save for this document queued or in
    /// flight.
    pub fn is_saving(&self) -> bool {
        self.coordinator.is_saving(&self.document_id)
    }

    /// What happened to the backup found at mount.
    pub fn recovery(&self) -> RecoveryOutcome {
        self.recovery
    }

    /// Backups removed by the session's cleanup sweep, if this mount ran it.
    pub fn expired_swept(&self) -> Option<usize> {
        self.swept
    }

    /// Call from the host's "about to exit" hook.
    ///
    /// Does not wait on the primary store. If there are unsaved changes, the
    /// editor content is read synchronously and handed to a detached backup
    /// write; the caller should then ask the user to confirm leaving. A dead
    /// editor is not read, but its unsaved changes still ask for confirmation.
    pub fn handle_unload(&self) -> UnloadOutcome {
        if !self.session.has_unsaved_changes() {
            return UnloadOutcome::Clean;
        }
        if !self.editor.is_alive() {
            tracing::warn!(
                "Unloading '{}' with unsaved changes from a closed editor",
                self.document_id
            );
            return UnloadOutcome::ConfirmLeave { backup: None };
        }
        let content = self.editor.content_snapshot();
        tracing::info!("Unloading with unsaved changes in '{}'", self.document_id);
        UnloadOutcome::ConfirmLeave {
            backup: Some(
                self.backups
                    .save_backup_detached(self.document_id.clone(), content),
            ),
        }
    }

    /// Stop listening for changes, flush unsaved content through the
    /// coordinator and wait for the worker to finish.
    pub async fn unmount(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.await;
        }
    }
}

async fn recover<B: BackupStorage, E: Editor, P: RecoveryPrompt>(
    document_id: &str,
    editor: &E,
    prompt: &P,
    backups: &EmergencyBackupService<B>,
    notifier: &dyn Notifier,
) -> RecoveryOutcome {
    let record = match backups.get_backup(document_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return RecoveryOutcome::NoBackup,
        Err(e) => {
            tracing::warn!("Could not read emergency backup for '{document_id}': {e}");
            return RecoveryOutcome::NoBackup;
        }
    };

    let window = backups.policy().recovery_window;
    let outcome = if !record.is_recoverable(backups.now(), window) {
        tracing::debug!("Ignoring stale backup for '{document_id}'");
        RecoveryOutcome::Expired
    } else if prompt.offer_restore(&record).await {
        editor.apply_content(&record.content);
        notifier.notify(Notice::BackupRestored {
            document_id: document_id.to_string(),
        });
        RecoveryOutcome::Restored
    } else {
        RecoveryOutcome::Declined
    };

    // Never offer the same backup twice.
    if let Err(e) = backups.delete_backup(document_id).await {
        tracing::warn!("Could not remove emergency backup for '{document_id}': {e}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_changes_is_one_dirty_cycle() {
        let session = SessionState::new();
        let mut phases = session.phase.subscribe();

        session.mark_changed();
        session.mark_changed();
        session.mark_changed();

        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), SavePhase::Dirty);
        session.mark_changed();
        assert!(!phases.has_changed().unwrap());
    }

    #[test]
    fn changes_during_save_keep_session_dirty() {
        let session = SessionState::new();
        session.mark_changed();
        assert!(session.begin_save());
        assert_eq!(*session.phase.borrow(), SavePhase::Saving);

        session.mark_changed();
        assert_eq!(*session.phase.borrow(), SavePhase::Saving);

        session.finish_save(true);
        assert_eq!(*session.phase.borrow(), SavePhase::Dirty);
        assert!(session.has_unsaved_changes());
    }

    #[test]
    fn failed_save_restores_dirty_flag() {
        let session = SessionState::new();
        session.mark_changed();
        assert!(session.begin_save());
        assert!(!session.has_unsaved_changes());

        session.finish_save(false);
        assert!(session.has_unsaved_changes());
        assert_eq!(*session.phase.borrow(), SavePhase::Dirty);
    }

    #[test]
    fn detached_session_ignores_changes() {
        let session = SessionState::new();
        session.detach();
        session.mark_changed();
        assert!(!session.has_unsaved_changes());
        assert!(!session.begin_save());
    }
}
