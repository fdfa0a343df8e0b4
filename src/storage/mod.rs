//! Persistence seams used by the save core.
//!
//! Two kinds of storage are involved:
//!
//! - [`DocumentStore`] -- the primary, possibly slow and fallible, home of a
//!   document. The crate ships [`FsDocumentStore`].
//! - [`BackupStorage`] -- a durable keyed medium, independent of the primary
//!   store, that holds emergency backups. The crate ships
//!   [`MemoryBackupStorage`], [`FsBackupStorage`] and [`S3BackupStorage`]
//!   (requires the `s3` feature).
//!
//! Implement either trait to plug in your own backend.

mod fs;
mod memory;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "s3")]
pub use aws_config::Region;
#[cfg(feature = "s3")]
pub use aws_sdk_s3::config::Credentials;
#[cfg(feature = "s3")]
pub use aws_sdk_s3::{Client as S3Client, Config as S3Config, config::Builder as S3ConfigBuilder};
pub use fs::{FsBackupStorage, FsDocumentStore, StoredDocument};
pub use memory::MemoryBackupStorage;
#[cfg(feature = "s3")]
pub use s3::S3BackupStorage;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload handed to [`DocumentStore::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// The primary persistence backend for documents.
///
/// The coordinator guarantees that calls for the same `document_id` never
/// overlap, so implementations do not need their own per-record locking.
/// Timeouts, if any, belong to the implementation: a timeout surfaced as an
/// error is treated like any other failed write.
///
/// # Implementing a custom backend
///
/// ```rust,no_run
/// use draft_keeper::{DocumentStore, DocumentUpdate, Result};
///
/// struct ProjectFolder;
///
/// impl DocumentStore for ProjectFolder {
///     async fn update(&self, document_id: &str, update: &DocumentUpdate) -> Result<()> {
///         // write update.content somewhere ...
///         Ok(())
///     }
/// }
/// ```
pub trait DocumentStore: Send + Sync + 'static {
    /// Replace the stored content of `document_id`.
    fn update(
        &self,
        document_id: &str,
        update: &DocumentUpdate,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A durable keyed byte store used as the emergency backup medium.
///
/// The backup service decides key shape and retention; a backend only has to
/// store bytes under keys.
pub trait BackupStorage: Send + Sync + 'static {
    /// Fetch the bytes stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// List every key that starts with `prefix`.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}
