//! Archive manifests: ordered, validated entry lists.
//!
//! Callers describe entries with the loose [`EntrySpec`] record and feed
//! them to a [`ManifestBuilder`]. Each append or prepend validates the spec
//! immediately; the finished [`Manifest`] carries the validation outcome per
//! position and an overall validity flag. The encoder refuses to start from
//! an invalid manifest.

use chrono::{DateTime, Utc};
use thiserror::Error;

use std::collections::VecDeque;

use crate::source::SourceSpec;

/// Unix permission and ownership attributes for one entry.
///
/// `mode` holds the permission bits only (0o000..=0o777); the file-type and
/// special bits are derived when the central directory is written. `uid` and
/// `gid` must be both set or both absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub setuid: bool,
    pub setgid: bool,
    pub sticky: bool,
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            mode: 0o644,
            uid: None,
            gid: None,
            setuid: false,
            setgid: false,
            sticky: false,
        }
    }
}

/// DEFLATE effort, mapped onto the zlib 0-9 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Level 0: no compression, but still a DEFLATE stream.
    None,
    /// Level 1.
    BestSpeed,
    #[default]
    Default,
    /// Level 9.
    BestCompression,
    /// An explicit level, 0..=9.
    Precise(u32),
}

impl CompressionLevel {
    pub(crate) fn to_zlib(self) -> u32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::BestSpeed => 1,
            CompressionLevel::Default => 6,
            CompressionLevel::BestCompression => 9,
            CompressionLevel::Precise(n) => n,
        }
    }
}

/// DEFLATE strategy selector.
///
/// Recognized and recorded per entry. The underlying flate2 context exposes
/// no strategy parameter, so encoding currently always runs with the default
/// strategy; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflateStrategy {
    #[default]
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

/// Options for DEFLATE entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeflateOptions {
    pub level: CompressionLevel,
    pub strategy: DeflateStrategy,
}

/// Compression method for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Store,
    Deflate(DeflateOptions),
}

impl Method {
    /// The value written to the ZIP method field.
    pub fn as_u16(&self) -> u16 {
        match self {
            Method::Store => 0,
            Method::Deflate(_) => 8,
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Deflate(DeflateOptions::default())
    }
}

/// Caller-facing entry description, validated into an [`Entry`].
///
/// All fields that the format can default are optional: a missing timestamp
/// becomes the Unix epoch, attributes default to mode 0o644, and the method
/// defaults to DEFLATE with default options.
#[derive(Debug, Clone, Default)]
pub struct EntrySpec {
    pub source: Option<SourceSpec>,
    pub path: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub attributes: Attributes,
    pub method: Method,
}

/// A validated, immutable archive entry.
///
/// Timestamps are `DateTime<Utc>` by construction, so the "timestamp must be
/// UTC" rule is enforced by the type rather than checked at runtime.
#[derive(Debug, Clone)]
pub struct Entry {
    pub source: SourceSpec,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Attributes,
    pub method: Method,
}

/// Why a single [`EntrySpec`] failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryProblem {
    #[error("source is missing")]
    SourceMissing,
    #[error("source is invalid: {0}")]
    SourceInvalid(String),
    #[error("path is missing")]
    PathMissing,
    #[error("attributes are invalid: {0}")]
    AttributesInvalid(String),
    #[error("method is invalid: {0}")]
    MethodInvalid(String),
}

fn validate(spec: EntrySpec) -> Result<Entry, EntryProblem> {
    let source = spec.source.ok_or(EntryProblem::SourceMissing)?;
    source.validate().map_err(EntryProblem::SourceInvalid)?;

    let path = match spec.path {
        Some(p) if !p.is_empty() => p,
        _ => return Err(EntryProblem::PathMissing),
    };

    let attrs = spec.attributes;
    if attrs.mode > 0o777 {
        return Err(EntryProblem::AttributesInvalid(format!(
            "mode {:o} exceeds 0o777",
            attrs.mode
        )));
    }
    if attrs.uid.is_some() != attrs.gid.is_some() {
        return Err(EntryProblem::AttributesInvalid(
            "uid and gid must be set together".to_string(),
        ));
    }

    if let Method::Deflate(opts) = &spec.method {
        if let CompressionLevel::Precise(n) = opts.level {
            if n > 9 {
                return Err(EntryProblem::MethodInvalid(format!(
                    "deflate level {} out of range 0..=9",
                    n
                )));
            }
        }
    }

    Ok(Entry {
        source,
        path,
        timestamp: spec.timestamp.unwrap_or(DateTime::UNIX_EPOCH),
        attributes: attrs,
        method: spec.method,
    })
}

/// Builder for a [`Manifest`]. Every mutation validates the new spec.
///
/// # Example
///
/// ```
/// use zipflow::{EntrySpec, ManifestBuilder, SourceSpec};
///
/// let manifest = ManifestBuilder::new()
///     .append(EntrySpec {
///         source: Some(SourceSpec::random(1024)),
///         path: Some("noise.bin".to_string()),
///         ..EntrySpec::default()
///     })
///     .build();
/// assert!(manifest.is_valid());
/// ```
#[derive(Default)]
pub struct ManifestBuilder {
    checked: VecDeque<Result<Entry, EntryProblem>>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        ManifestBuilder::default()
    }

    /// Validate `spec` and add it at the end of the manifest.
    pub fn append(mut self, spec: EntrySpec) -> Self {
        self.checked.push_back(validate(spec));
        self
    }

    /// Validate `spec` and add it at the front of the manifest.
    pub fn prepend(mut self, spec: EntrySpec) -> Self {
        self.checked.push_front(validate(spec));
        self
    }

    pub fn build(self) -> Manifest {
        Manifest {
            checked: self.checked.into_iter().collect(),
        }
    }
}

/// An ordered list of validated entries with an overall validity flag.
///
/// Validity is the AND of per-entry validity; an empty manifest is invalid.
/// Once built, a manifest is never mutated by the encoder.
#[derive(Debug, Clone)]
pub struct Manifest {
    checked: Vec<Result<Entry, EntryProblem>>,
}

impl Manifest {
    /// Convenience for a builder.
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::new()
    }

    pub fn is_valid(&self) -> bool {
        !self.checked.is_empty() && self.checked.iter().all(|c| c.is_ok())
    }

    pub fn len(&self) -> usize {
        self.checked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checked.is_empty()
    }

    /// Validation problems with their entry positions.
    pub fn problems(&self) -> Vec<(usize, EntryProblem)> {
        self.checked
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().err().map(|p| (i, p.clone())))
            .collect()
    }

    /// The validated entries, in manifest order. Only meaningful when the
    /// manifest is valid.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.checked.iter().filter_map(|c| c.as_ref().ok())
    }
}
