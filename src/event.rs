//! Progress and error events emitted while a stream is produced.
//!
//! Events are delivered synchronously and in order, from the same task that
//! pulls the stream. A handler that panics unwinds into the consumer; that
//! is the caller's responsibility.

use crate::error::Error;
use crate::manifest::Entry;
use crate::zip::EntryInfo;

/// Callback surface for stream observability.
pub type EventHandler = Box<dyn FnMut(Event<'_>) + Send>;

/// One observable moment in the life of an archive stream.
#[derive(Debug)]
pub enum Event<'a> {
    /// The stream was started from a valid manifest.
    StreamStarted { stream_id: &'a str },
    /// An entry is about to be encoded (fired before its source is built).
    EntryStarted { entry: &'a Entry },
    /// A payload chunk was encoded; `info` carries the running totals.
    EntryUpdated { entry: &'a Entry, info: &'a EntryInfo },
    /// The entry's payload ended and its data descriptor was written.
    EntryCompleted { entry: &'a Entry },
    /// The entry failed to start or to stream; the error policy decides
    /// whether the stream continues.
    EntryFailed { entry: &'a Entry, reason: &'a Error },
    /// The stream terminated, cleanly or with the given reason.
    StreamEnded { result: Result<(), &'a Error> },
}
