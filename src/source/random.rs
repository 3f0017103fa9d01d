//! Synthetic payload source of strong random bytes.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;

use super::{PayloadSource, SourceChunk, CHUNK_SIZE};
use crate::error::Result;

/// Produces exactly the requested number of bytes from the OS entropy
/// source, then `Eof`. The remaining count is the only state.
pub(super) struct RandomSource {
    remaining: u64,
}

impl RandomSource {
    pub fn new(bytes: u64) -> Self {
        RandomSource { remaining: bytes }
    }
}

#[async_trait]
impl PayloadSource for RandomSource {
    async fn read(&mut self) -> Result<SourceChunk> {
        if self.remaining == 0 {
            return Ok(SourceChunk::Eof);
        }
        let n = (CHUNK_SIZE as u64).min(self.remaining) as usize;
        let mut buf = vec![0u8; n];
        OsRng.fill_bytes(&mut buf);
        self.remaining -= n as u64;
        Ok(SourceChunk::Data(buf))
    }
}
