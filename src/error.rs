//! Error types for the `draft_keeper` crate.

/// All errors that can occur while saving, backing up or recovering drafts.
#[derive(Debug, thiserror::Error)]
pub enum DraftKeeperError {
    /// The primary document store rejected a write.
    #[error("Primary store write failed: {0}")]
    PrimaryWrite(Box<dyn std::error::Error + Send + Sync>),

    /// The emergency backup medium failed to read, write or delete a record.
    #[error("Backup storage failed: {0}")]
    BackupStorage(Box<dyn std::error::Error + Send + Sync>),

    /// A scheduled save did not reach the primary store. An emergency backup
    /// was attempted before this error was returned.
    #[error("Save of '{document_id}' failed: {source}")]
    SaveFailed {
        document_id: String,
        source: Box<DraftKeeperError>,
    },

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading configuration or other local files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document id or storage key cannot be mapped onto the backend.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The background save task panicked or was cancelled by runtime shutdown.
    #[error("Save task aborted: {0}")]
    TaskAborted(String),

    /// The configuration is invalid.
    #[error("Config error: {0}")]
    Config(String),
}

/// A type alias for `Result<T, DraftKeeperError>`.
pub type Result<T> = std::result::Result<T, DraftKeeperError>;
