//! # zipflow
//!
//! A streaming ZIP64 archive generator.
//!
//! This library builds a single ZIP archive from an ordered manifest of
//! entries whose payloads come from heterogeneous sources: local files,
//! HTTP(S) downloads, caller-supplied generators, and random bytes. The
//! archive is produced as a lazy sequence of byte chunks, so it can be piped
//! into a file or an HTTP response body without ever holding the full
//! archive, or any single payload, in memory.
//!
//! ## Features
//!
//! - ZIP64 output unconditionally (archives and entries beyond 4 GiB)
//! - STORED and DEFLATE compression with per-entry options
//! - Streaming local file headers with data descriptors (no seeking)
//! - Bounded, backpressured buffering for HTTP payloads
//! - Skip-or-halt handling of per-entry failures
//! - Synchronous progress events for observability
//!
//! ## Example
//!
//! ```no_run
//! use zipflow::{EncodeOptions, EntrySpec, ManifestBuilder, SourceSpec, ZipStream};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manifest = ManifestBuilder::new()
//!         .append(EntrySpec {
//!             source: Some(SourceSpec::file("report.csv")),
//!             path: Some("report.csv".to_string()),
//!             ..EntrySpec::default()
//!         })
//!         .append(EntrySpec {
//!             source: Some(SourceSpec::url("https://example.com/logo.png")),
//!             path: Some("assets/logo.png".to_string()),
//!             ..EntrySpec::default()
//!         })
//!         .build();
//!
//!     let mut stream = ZipStream::new(manifest, EncodeOptions::default());
//!     let mut out = tokio::fs::File::create("bundle.zip").await?;
//!     stream.write_to(&mut out).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod compress;
pub mod error;
pub mod event;
pub mod manifest;
pub mod source;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use event::{Event, EventHandler};
pub use manifest::{
    Attributes, CompressionLevel, DeflateOptions, DeflateStrategy, Entry, EntryProblem, EntrySpec,
    Manifest, ManifestBuilder, Method,
};
pub use source::{SourceSpec, UrlOptions};
pub use zip::{EncodeOptions, EntryInfo, ErrorPolicy, ZipStream};
