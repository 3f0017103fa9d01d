//! Error types for archive production.

use thiserror::Error;

use crate::manifest::EntryProblem;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced while producing an archive stream.
///
/// Per-entry failures (source build and read errors) are subject to the
/// stream's error policy; an invalid manifest or a compressor failure always
/// halts the stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The manifest failed validation; no bytes were emitted.
    ///
    /// Carries one problem per offending entry position. An empty manifest
    /// reports no per-entry problems but is invalid all the same.
    #[error("invalid manifest ({} problem(s))", problems.len())]
    InvalidManifest { problems: Vec<(usize, EntryProblem)> },

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The HTTP request could not be issued or the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-200 status before any body bytes.
    #[error("HTTP request failed with status: {0}")]
    HttpStatus(u16),

    /// The response body ended before the server finished sending it.
    #[error("transfer aborted: {0}")]
    Truncated(String),

    /// A dynamic source's resolver function reported an error.
    #[error("dynamic source failed: {0}")]
    Dynamic(String),

    /// The compression context rejected input. Fatal; should not occur for
    /// STORE or DEFLATE over valid input.
    #[error("compressor failure: {0}")]
    Compress(String),
}
