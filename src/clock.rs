//! Wall-clock abstraction used for backup timestamps and retention checks.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Backup ages are measured in wall-clock time (they must survive process
/// restarts), so this is deliberately separate from the tokio timer that
/// drives the auto-save check.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
