//! Background worker that periodically flushes a dirty editing session.
//!
//! This module is internal -- users interact with it indirectly through
//! [`AutoSaveController`](crate::AutoSaveController).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};

use crate::controller::{Editor, EditorContent, SessionState};
use crate::coordinator::SaveCoordinator;
use crate::storage::{BackupStorage, DocumentStore};

pub async fn run<D: DocumentStore, B: BackupStorage, E: Editor>(
    mut shutdown_rx: oneshot::Receiver<()>,
    session: Arc<SessionState>,
    coordinator: SaveCoordinator<D, B>,
    editor: Arc<E>,
    document_id: String,
    check_interval: Duration,
) {
    let mut interval = time::interval(check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the first immediate tick
    interval.tick().await;

    loop {
        tokio::select! {
            biased;

            // Also fires when the controller is dropped without unmounting.
            _ = &mut shutdown_rx => {
                session.detach();
                if session.has_unsaved_changes() {
                    tracing::info!("Flushing '{document_id}' before teardown");
                    flush(&session, &coordinator, &editor, &document_id).await;
                }
                tracing::info!("Auto-save for '{document_id}' stopped");
                return;
            }

            _ = interval.tick() => {
                if session.has_unsaved_changes() {
                    flush(&session, &coordinator, &editor, &document_id).await;
                }
            }
        }
    }
}

async fn flush<D: DocumentStore, B: BackupStorage, E: Editor>(
    session: &SessionState,
    coordinator: &SaveCoordinator<D, B>,
    editor: &Arc<E>,
    document_id: &str,
) {
    if !editor.is_alive() {
        tracing::debug!("Editor for '{document_id}' is gone, skipping save");
        return;
    }
    if !session.begin_save() {
        return;
    }

    let result = coordinator
        .schedule_save(document_id, EditorContent(Arc::clone(editor)))
        .await;
    if let Err(e) = &result {
        tracing::warn!("Auto-save of '{document_id}' failed, will retry: {e}");
    }
    session.finish_save(result.is_ok());
}
