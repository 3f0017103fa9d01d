//! Compression contexts for entry payloads.
//!
//! ZIP entries use raw DEFLATE: no zlib header, no Adler-32 trailer
//! (window bits -15). [`Compressor`] wraps the low-level flate2 context so
//! the encoder controls flushing and can reuse one context across
//! consecutive DEFLATE entries via [`Compressor::reset`].

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::{Error, Result};
use crate::manifest::Method;

const OUT_RESERVE: usize = 32 * 1024;

/// A per-entry compression context.
pub enum Compressor {
    Store,
    Deflate { ctx: Compress, level: u32 },
}

impl Compressor {
    /// Open a fresh context for `method`. Neither method emits prelude
    /// bytes before the first payload chunk.
    pub fn open(method: &Method) -> Compressor {
        match method {
            Method::Store => Compressor::Store,
            Method::Deflate(opts) => {
                let level = opts.level.to_zlib();
                Compressor::Deflate {
                    ctx: Compress::new(Compression::new(level), false),
                    level,
                }
            }
        }
    }

    /// Whether this context can be reused (via [`reset`](Self::reset)) for
    /// an entry encoded with `method`.
    pub fn same_kind(&self, method: &Method) -> bool {
        matches!(
            (self, method),
            (Compressor::Store, Method::Store) | (Compressor::Deflate { .. }, Method::Deflate(_))
        )
    }

    /// Compress one payload chunk. The output may be empty while the
    /// context accumulates input.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Store => Ok(input.to_vec()),
            Compressor::Deflate { ctx, .. } => {
                let mut out = Vec::with_capacity(input.len() / 2 + 64);
                let mut consumed = 0usize;
                while consumed < input.len() {
                    if out.len() == out.capacity() {
                        out.reserve(OUT_RESERVE);
                    }
                    let before = ctx.total_in();
                    ctx.compress_vec(&input[consumed..], &mut out, FlushCompress::None)
                        .map_err(|e| Error::Compress(e.to_string()))?;
                    consumed += (ctx.total_in() - before) as usize;
                }
                Ok(out)
            }
        }
    }

    /// Flush residual compressed bytes at the end of an entry's payload.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        match self {
            Compressor::Store => Ok(Vec::new()),
            Compressor::Deflate { ctx, .. } => {
                let mut out = Vec::with_capacity(OUT_RESERVE);
                loop {
                    if out.len() == out.capacity() {
                        out.reserve(OUT_RESERVE);
                    }
                    let status = ctx
                        .compress_vec(&[], &mut out, FlushCompress::Finish)
                        .map_err(|e| Error::Compress(e.to_string()))?;
                    match status {
                        Status::StreamEnd => return Ok(out),
                        Status::Ok | Status::BufError => continue,
                    }
                }
            }
        }
    }

    /// Prepare the context for the next entry of the same kind without
    /// releasing it. A changed DEFLATE level replaces the inner context.
    pub fn reset(&mut self, method: &Method) {
        match (self, method) {
            (Compressor::Store, Method::Store) => {}
            (Compressor::Deflate { ctx, level }, Method::Deflate(opts)) => {
                let wanted = opts.level.to_zlib();
                if *level == wanted {
                    ctx.reset();
                } else {
                    *ctx = Compress::new(Compression::new(wanted), false);
                    *level = wanted;
                }
            }
            // Kind changes go through open(); reaching here is an encoder bug.
            (this, method) => *this = Compressor::open(method),
        }
    }

    /// Release the underlying context. No further calls are permitted.
    pub fn finalize(self) {}
}
