//! Local file payload source.

use async_trait::async_trait;
use log::debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{PayloadSource, SourceChunk, CHUNK_SIZE};
use crate::error::Result;

/// Reads a file front to back in fixed-size chunks.
pub(super) struct FileSource {
    file: File,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        debug!("opened file source {:?}", path);
        Ok(FileSource { file })
    }
}

#[async_trait]
impl PayloadSource for FileSource {
    async fn read(&mut self) -> Result<SourceChunk> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(SourceChunk::Eof);
        }
        buf.truncate(n);
        Ok(SourceChunk::Data(buf))
    }
}
