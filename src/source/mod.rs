//! Payload sources: drivers that yield an entry's bytes chunk by chunk.
//!
//! A [`SourceSpec`] is a tagged descriptor of where an entry's payload comes
//! from. Building a spec yields a live [`PayloadSource`], which the encoder
//! pulls until [`SourceChunk::Eof`]. Sources own whatever they need (an open
//! file, a download pipeline, a countdown of random bytes) and release it
//! when dropped.

mod file;
mod random;
pub mod url;

pub use url::UrlOptions;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use file::FileSource;
use random::RandomSource;
use url::UrlSource;

/// Preferred chunk size for sources that choose their own read granularity.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// A zero-arg resolver invoked when a dynamic source is built. It returns
/// the descriptor to use for the entry, or a reason string on failure.
pub type DynamicFn = Arc<dyn Fn() -> std::result::Result<SourceSpec, String> + Send + Sync>;

/// Where an entry's payload comes from.
#[derive(Clone)]
pub enum SourceSpec {
    /// Read a local file front to back.
    File { path: PathBuf },
    /// Download over HTTP(S), buffered with backpressure.
    Url { url: String, options: UrlOptions },
    /// Resolve another descriptor at encoding time.
    Dynamic(DynamicFn),
    /// Exactly `bytes` cryptographically strong random bytes.
    Random { bytes: u64 },
}

impl SourceSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SourceSpec::File { path: path.into() }
    }

    pub fn url(url: impl Into<String>) -> Self {
        SourceSpec::Url {
            url: url.into(),
            options: UrlOptions::default(),
        }
    }

    pub fn url_with(url: impl Into<String>, options: UrlOptions) -> Self {
        SourceSpec::Url {
            url: url.into(),
            options,
        }
    }

    pub fn dynamic<F>(resolve: F) -> Self
    where
        F: Fn() -> std::result::Result<SourceSpec, String> + Send + Sync + 'static,
    {
        SourceSpec::Dynamic(Arc::new(resolve))
    }

    pub fn random(bytes: u64) -> Self {
        SourceSpec::Random { bytes }
    }

    /// Structural validation, used by manifest construction. Only `http`
    /// and `https` URLs are accepted; a dynamic source cannot be checked
    /// until it resolves.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            SourceSpec::Url { url, .. } => match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
                Ok(parsed) => Err(format!("unsupported URL scheme: {}", parsed.scheme())),
                Err(e) => Err(format!("malformed URL: {}", e)),
            },
            SourceSpec::File { .. } | SourceSpec::Dynamic(_) | SourceSpec::Random { .. } => Ok(()),
        }
    }

    /// Construct the live source. Must run inside a tokio runtime (URL
    /// sources spawn their download pipeline here).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, the HTTP client
    /// cannot be constructed, or a dynamic resolver fails or yields an
    /// invalid descriptor. Connection failures surface later, on the first
    /// read.
    pub fn build(&self) -> Result<Box<dyn PayloadSource>> {
        match self {
            SourceSpec::File { path } => Ok(Box::new(FileSource::open(path)?)),
            SourceSpec::Url { url, options } => {
                self.validate().map_err(Error::Connect)?;
                Ok(Box::new(UrlSource::spawn(url.clone(), options)?))
            }
            SourceSpec::Dynamic(resolve) => {
                let spec = resolve().map_err(Error::Dynamic)?;
                spec.validate().map_err(Error::Dynamic)?;
                spec.build()
            }
            SourceSpec::Random { bytes } => Ok(Box::new(RandomSource::new(*bytes))),
        }
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::File { path } => f.debug_struct("File").field("path", path).finish(),
            SourceSpec::Url { url, options } => f
                .debug_struct("Url")
                .field("url", url)
                .field("options", options)
                .finish(),
            SourceSpec::Dynamic(_) => f.write_str("Dynamic(..)"),
            SourceSpec::Random { bytes } => {
                f.debug_struct("Random").field("bytes", bytes).finish()
            }
        }
    }
}

/// The next piece of an entry's payload.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceChunk {
    Data(Vec<u8>),
    /// Terminal: the payload ended cleanly.
    Eof,
}

/// A live payload producer for one entry.
///
/// `read` mutates the source in place and is called repeatedly until it
/// returns [`SourceChunk::Eof`] or an error; both are terminal.
#[async_trait]
pub trait PayloadSource: Send {
    async fn read(&mut self) -> Result<SourceChunk>;
}
