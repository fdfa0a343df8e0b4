//! The [`ContentSource`] trait: a lazily evaluated view of a document's
//! current content.

/// Produces the current content of a document on demand.
///
/// The coordinator calls [`snapshot`](ContentSource::snapshot) at the moment a
/// write starts, not when the save was scheduled, so saves that queued up
/// behind a slow write persist the newest text rather than the text that was
/// current when they were requested.
///
/// Any `Fn() -> String` closure is a content source:
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use draft_keeper::ContentSource;
///
/// let text = Arc::new(Mutex::new(String::from("It was a dark and stormy night")));
/// let source = {
///     let text = Arc::clone(&text);
///     move || text.lock().unwrap().clone()
/// };
///
/// text.lock().unwrap().push_str("; the rain fell in torrents");
/// assert!(source.snapshot().ends_with("torrents"));
/// ```
pub trait ContentSource: Send + Sync + 'static {
    /// Returns the content as of right now.
    fn snapshot(&self) -> String;
}

impl<F> ContentSource for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn snapshot(&self) -> String {
        self()
    }
}
