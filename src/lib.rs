//! # draft_keeper
//!
//! Save coordination and crash recovery for documents edited in a long-running
//! writing application.
//!
//! ## Overview
//!
//! - [`SaveCoordinator`] serializes writes per document id against a slow,
//!   fallible [`DocumentStore`]: one write in flight per id, FIFO order, and the
//!   content is read when the write starts so the newest text wins. A failed
//!   write leaves an emergency backup and raises a [`Notice`].
//! - [`EmergencyBackupService`] keeps time-stamped snapshots in a
//!   [`BackupStorage`] medium independent of the primary store, and purges
//!   them after a retention period.
//! - [`AutoSaveController`] watches one editing session: change
//!   notifications raise a dirty flag, a periodic check flushes it through the
//!   coordinator, unload snapshots unsaved text into a backup, and mounting
//!   offers to restore a recent backup.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//! use draft_keeper::{BackupRecord, DraftKeeperBuilder, Editor, FsBackupStorage,
//!     FsDocumentStore, RecoveryPrompt, UnloadOutcome};
//!
//! struct SceneEditor { text: Mutex<String> }
//!
//! impl Editor for SceneEditor {
//!     fn content_snapshot(&self) -> String { self.text.lock().unwrap().clone() }
//!     fn apply_content(&self, content: &str) { *self.text.lock().unwrap() = content.to_string(); }
//! }
//!
//! struct AlwaysRestore;
//!
//! impl RecoveryPrompt for AlwaysRestore {
//!     async fn offer_restore(&self, _backup: &BackupRecord) -> bool { true }
//! }
//!
//! # async fn example() {
//! let keeper = DraftKeeperBuilder::new(
//!     FsDocumentStore::new("/tmp/novel/manuscript"),
//!     FsBackupStorage::new("/tmp/novel/.emergency_backups"),
//! )
//! .build();
//!
//! let editor = Arc::new(SceneEditor { text: Mutex::new(String::new()) });
//! let session = keeper.mount("scene-7", Arc::clone(&editor), &AlwaysRestore).await;
//!
//! // Wire this into the editor's change hook.
//! let signal = session.edit_signal();
//! editor.text.lock().unwrap().push_str("Chapter One");
//! signal.changed();
//!
//! // From the host's exit hook:
//! if let UnloadOutcome::ConfirmLeave { .. } = session.handle_unload() {
//!     // ask the user before quitting
//! }
//!
//! // When the editor closes, flush pending changes:
//! session.unmount().await;
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `s3` | **yes** | Enables [`S3BackupStorage`] and re-exports from `aws-sdk-s3` / `aws-config`. |
//! | `rustls-tls` | no | Use `rustls` instead of the platform TLS for the AWS SDK. |

pub mod backup;
pub mod clock;
pub mod config;
pub mod content;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod keeper;
pub mod notify;
pub mod storage;
mod worker;

pub use backup::{BackupPolicy, BackupRecord, EmergencyBackupService};
pub use clock::{Clock, SystemClock};
pub use config::{DraftKeeperBuilder, KeeperConfig};
pub use content::ContentSource;
pub use controller::{
    AutoSaveController, EditSignal, Editor, RecoveryOutcome, RecoveryPrompt, SavePhase,
    UnloadOutcome,
};
pub use coordinator::{PendingSave, SaveCoordinator};
pub use error::{DraftKeeperError, Result};
pub use keeper::DraftKeeper;
pub use notify::{Notice, Notifier, TracingNotifier};
#[cfg(feature = "s3")]
pub use storage::{Credentials, Region, S3BackupStorage, S3Client, S3Config, S3ConfigBuilder};
pub use storage::{
    BackupStorage, DocumentStore, DocumentUpdate, FsBackupStorage, FsDocumentStore,
    MemoryBackupStorage, StoredDocument,
};
