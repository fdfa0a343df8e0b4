//! User-facing notifications raised by the save core.

/// An event the user should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A save did not reach the primary store. The content was handed to the
    /// emergency backup store and will be retried by the next auto-save cycle.
    SaveFailed { document_id: String, reason: String },

    /// Content from an emergency backup was restored into the editor.
    BackupRestored { document_id: String },
}

/// Sink for [`Notice`]s, typically a toast or status bar in the host
/// application.
///
/// Implementations must not block: notices are raised from inside save tasks.
/// Closures taking a [`Notice`] implement this trait.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notice: Notice);
}

impl<F> Notifier for F
where
    F: Fn(Notice) + Send + Sync + 'static,
{
    fn notify(&self, notice: Notice) {
        self(notice)
    }
}

/// Default [`Notifier`] that reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::SaveFailed {
                document_id,
                reason,
            } => {
                tracing::warn!("Could not save '{document_id}', kept an emergency backup: {reason}");
            }
            Notice::BackupRestored { document_id } => {
                tracing::info!("Restored '{document_id}' from emergency backup");
            }
        }
    }
}
