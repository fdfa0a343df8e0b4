//! Per-document save serialization.
//!
//! [`SaveCoordinator`] guarantees that at most one write per document id is in
//! flight, that writes for the same id run in the order they were scheduled,
//! and that a failed write leaves an emergency backup behind.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::backup::EmergencyBackupService;
use crate::clock::Clock;
use crate::content::ContentSource;
use crate::error::{DraftKeeperError, Result};
use crate::notify::{Notice, Notifier};
use crate::storage::{BackupStorage, DocumentStore, DocumentUpdate};

/// Resolves once the save it belongs to has settled, whatever the outcome.
type Settled = Shared<BoxFuture<'static, ()>>;

/// The registered save for one document id. Absence from the map means idle.
struct PendingEntry {
    ticket: u64,
    settled: Settled,
}

struct Inner<D, B> {
    store: D,
    backups: EmergencyBackupService<B>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl<D, B> Inner<D, B> {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: DocumentStore, B: BackupStorage> Inner<D, B> {
    async fn write<G: ContentSource>(&self, document_id: &str, source: &G) -> Result<()> {
        let update = DocumentUpdate {
            content: source.snapshot(),
            updated_at: self.clock.now(),
        };

        match self.store.update(document_id, &update).await {
            Ok(()) => {
                tracing::debug!(
                    "Saved '{document_id}' ({} bytes)",
                    update.content.len()
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Save of '{document_id}' failed: {e}");
                // The editor may have moved on while the write was failing.
                self.backups
                    .save_backup(document_id, source.snapshot())
                    .await;
                self.notifier.notify(Notice::SaveFailed {
                    document_id: document_id.to_string(),
                    reason: e.to_string(),
                });
                Err(DraftKeeperError::SaveFailed {
                    document_id: document_id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Deregisters a save and wakes its successor when dropped, so the cleanup
/// runs on success, failure, panic and task abort alike.
struct SettleGuard<D, B> {
    inner: Arc<Inner<D, B>>,
    document_id: String,
    ticket: u64,
    done: Option<oneshot::Sender<()>>,
}

impl<D, B> Drop for SettleGuard<D, B> {
    fn drop(&mut self) {
        {
            let mut pending = self.inner.lock_pending();
            // A later save may already own the slot; only clear our own entry.
            if pending
                .get(&self.document_id)
                .is_some_and(|entry| entry.ticket == self.ticket)
            {
                pending.remove(&self.document_id);
            }
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Serializes saves per document id against a [`DocumentStore`].
///
/// Cloning is cheap; clones share the pending-save map, so every part of the
/// application that writes a given document must go through clones of the
/// same coordinator.
///
/// Saves run on spawned tokio tasks: once scheduled, a save runs to
/// completion even if the returned [`PendingSave`] is dropped.
pub struct SaveCoordinator<D, B> {
    inner: Arc<Inner<D, B>>,
}

impl<D, B> Clone for SaveCoordinator<D, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DocumentStore, B: BackupStorage> SaveCoordinator<D, B> {
    pub fn new(
        store: D,
        backups: EmergencyBackupService<B>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backups,
                notifier,
                clock,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule a write of `document_id`.
    ///
    /// The save is registered before this function returns, so an immediate
    /// [`is_saving`](Self::is_saving) observes it. It starts once every
    /// previously scheduled save for the same id has settled (their failures
    /// do not cancel it), then reads `source` and writes the result.
    ///
    /// On failure the content is re-read, stored as an emergency backup, a
    /// [`Notice::SaveFailed`] is raised and the returned future resolves to
    /// [`DraftKeeperError::SaveFailed`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_save<G: ContentSource>(
        &self,
        document_id: impl Into<String>,
        source: G,
    ) -> PendingSave {
        let document_id = document_id.into();
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let settled: Settled = done_rx.map(|_| ()).boxed().shared();

        let previous = self
            .inner
            .lock_pending()
            .insert(document_id.clone(), PendingEntry { ticket, settled })
            .map(|entry| entry.settled);

        let guard = SettleGuard {
            inner: Arc::clone(&self.inner),
            document_id: document_id.clone(),
            ticket,
            done: Some(done_tx),
        };
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Some(previous) = previous {
                previous.await;
            }
            inner.write(&document_id, &source).await
        });

        PendingSave { handle }
    }

    /// Whether a save for `document_id` is queued or in flight.
    pub fn is_saving(&self, document_id: &str) -> bool {
        self.inner.lock_pending().contains_key(document_id)
    }

    /// Number of document ids with a save queued or in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// The backup service failed saves fall back to.
    pub fn backups(&self) -> &EmergencyBackupService<B> {
        &self.inner.backups
    }
}

/// Completion of a save scheduled with [`SaveCoordinator::schedule_save`].
///
/// Dropping it does not cancel the save.
#[must_use = "a dropped PendingSave still runs, but its failure goes unobserved"]
pub struct PendingSave {
    handle: JoinHandle<Result<()>>,
}

impl Future for PendingSave {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(DraftKeeperError::TaskAborted(e.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupPolicy;
    use crate::clock::SystemClock;
    use crate::notify::TracingNotifier;
    use crate::storage::MemoryBackupStorage;

    struct NullStore;

    impl DocumentStore for NullStore {
        async fn update(&self, _document_id: &str, _update: &DocumentUpdate) -> Result<()> {
            Ok(())
        }
    }

    fn coordinator() -> SaveCoordinator<NullStore, MemoryBackupStorage> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backups = EmergencyBackupService::new(
            MemoryBackupStorage::new(),
            BackupPolicy::default(),
            Arc::clone(&clock),
        );
        SaveCoordinator::new(NullStore, backups, Arc::new(TracingNotifier), clock)
    }

    #[tokio::test]
    async fn registration_is_visible_before_first_poll() {
        let coordinator = coordinator();
        let save = coordinator.schedule_save("scene-1", || "text".to_string());

        assert!(coordinator.is_saving("scene-1"));
        assert!(!coordinator.is_saving("scene-2"));

        save.await.unwrap();
        assert!(!coordinator.is_saving("scene-1"));
    }

    #[tokio::test]
    async fn stale_guard_leaves_newer_entry_alone() {
        let coordinator = coordinator();
        let first = coordinator.schedule_save("scene-1", || "one".to_string());
        let second = coordinator.schedule_save("scene-1", || "two".to_string());
        assert_eq!(coordinator.pending_count(), 1);

        first.await.unwrap();
        // The first save settled, but the second is still registered until
        // it settles too.
        second.await.unwrap();
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_handle_still_saves() {
        let coordinator = coordinator();
        drop(coordinator.schedule_save("scene-1", || "text".to_string()));
        coordinator
            .schedule_save("scene-1", || "text".to_string())
            .await
            .unwrap();
        assert!(!coordinator.is_saving("scene-1"));
    }
}
