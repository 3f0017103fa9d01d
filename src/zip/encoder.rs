//! The streaming encoder state machine.
//!
//! [`ZipStream`] turns a validated manifest into a pull-driven sequence of
//! byte chunks. Each [`next_chunk`](ZipStream::next_chunk) call runs exactly
//! one step of the machine and yields at most one chunk (possibly empty):
//! starting an entry emits its local header, a payload step emits one
//! compressed chunk, finishing an entry emits the compressor flush plus the
//! data descriptor, and the final step emits the whole central directory
//! with its ZIP64 trailer.
//!
//! `bytes_emitted` counts every byte handed to the consumer and is the sole
//! source of truth for local-header offsets and the central-directory
//! position.

use crc32fast::Hasher;
use log::debug;
use std::collections::VecDeque;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::records;
use super::EntryInfo;
use crate::compress::Compressor;
use crate::error::{Error, Result};
use crate::event::{Event, EventHandler};
use crate::manifest::{Entry, Manifest};
use crate::source::{PayloadSource, SourceChunk};

/// What to do when an entry fails to start or to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the stream; the output is truncated and invalid.
    #[default]
    Halt,
    /// Drop the entry from the archive and continue with the next one.
    Skip,
}

/// Options for [`ZipStream::new`].
#[derive(Default)]
pub struct EncodeOptions {
    pub on_error: ErrorPolicy,
    pub on_event: Option<EventHandler>,
}

enum Phase {
    /// Waiting for the first pull; holds the manifest until then.
    Init(Manifest),
    Running,
    Done,
}

struct Current {
    entry: Entry,
    source: Box<dyn PayloadSource>,
    info: EntryInfo,
    hasher: Hasher,
    compressor: Compressor,
}

/// A lazy ZIP64 archive stream.
///
/// Pull with [`next_chunk`](Self::next_chunk) until `None`, or drain with
/// [`write_to`](Self::write_to). Dropping the stream mid-archive releases
/// the current source and compressor; the consumer then holds a truncated,
/// invalid archive.
pub struct ZipStream {
    stream_id: String,
    phase: Phase,
    current: Option<Current>,
    encoded: Vec<(Entry, std::result::Result<EntryInfo, Error>)>,
    remaining: VecDeque<Entry>,
    bytes_emitted: u64,
    /// Parked between entries for reuse across same-method runs.
    compressor: Option<Compressor>,
    on_error: ErrorPolicy,
    on_event: Option<EventHandler>,
}

impl ZipStream {
    /// Prepare a stream over `manifest`. Validity is checked on the first
    /// pull; an invalid manifest yields an error before any bytes.
    pub fn new(manifest: Manifest, options: EncodeOptions) -> ZipStream {
        ZipStream {
            stream_id: format!("{:032x}", rand::random::<u128>()),
            phase: Phase::Init(manifest),
            current: None,
            encoded: Vec::new(),
            remaining: VecDeque::new(),
            bytes_emitted: 0,
            compressor: None,
            on_error: options.on_error,
            on_event: options.on_event,
        }
    }

    /// An opaque identifier for this stream, stable for its lifetime.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Total bytes yielded so far.
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes_emitted
    }

    fn fire(&mut self, event: Event<'_>) {
        if let Some(handler) = self.on_event.as_mut() {
            handler(event);
        }
    }

    /// Run one state-machine step. Returns `None` once the stream has
    /// terminated, cleanly or not.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>>> {
        match std::mem::replace(&mut self.phase, Phase::Running) {
            Phase::Init(manifest) => Some(self.start(manifest)),
            Phase::Running => Some(self.step().await),
            Phase::Done => {
                self.phase = Phase::Done;
                None
            }
        }
    }

    /// First step: validate the manifest and announce the stream.
    fn start(&mut self, manifest: Manifest) -> Result<Vec<u8>> {
        if !manifest.is_valid() {
            let error = Error::InvalidManifest {
                problems: manifest.problems(),
            };
            self.phase = Phase::Done;
            self.fire(Event::StreamEnded {
                result: Err(&error),
            });
            return Err(error);
        }

        self.remaining = manifest.entries().cloned().collect();
        debug!(
            "stream {} started with {} entries",
            self.stream_id,
            self.remaining.len()
        );
        let stream_id = std::mem::take(&mut self.stream_id);
        self.fire(Event::StreamStarted {
            stream_id: &stream_id,
        });
        self.stream_id = stream_id;
        Ok(Vec::new())
    }

    async fn step(&mut self) -> Result<Vec<u8>> {
        match self.current.take() {
            Some(current) => self.step_entry(current).await,
            None => match self.remaining.pop_front() {
                Some(entry) => self.start_entry(entry),
                None => self.finish_stream(),
            },
        }
    }

    /// Begin the next entry: build its source, ready the compressor, and
    /// emit the local file header.
    fn start_entry(&mut self, entry: Entry) -> Result<Vec<u8>> {
        self.fire(Event::EntryStarted { entry: &entry });

        let source = match entry.source.build() {
            Ok(source) => source,
            Err(reason) => return self.entry_failed(entry, reason),
        };

        let compressor = match self.compressor.take() {
            Some(mut compressor) if compressor.same_kind(&entry.method) => {
                compressor.reset(&entry.method);
                compressor
            }
            Some(compressor) => {
                compressor.finalize();
                Compressor::open(&entry.method)
            }
            None => Compressor::open(&entry.method),
        };

        let info = EntryInfo {
            offset: self.bytes_emitted,
            ..EntryInfo::default()
        };
        let header = records::local_file_header(&entry)?;
        self.bytes_emitted += header.len() as u64;
        self.current = Some(Current {
            entry,
            source,
            info,
            hasher: Hasher::new(),
            compressor,
        });
        Ok(header)
    }

    /// One payload step for the current entry.
    async fn step_entry(&mut self, mut current: Current) -> Result<Vec<u8>> {
        match current.source.read().await {
            Ok(SourceChunk::Data(bytes)) => {
                current.hasher.update(&bytes);
                current.info.size += bytes.len() as u64;
                current.info.checksum = current.hasher.clone().finalize();

                let out = match current.compressor.feed(&bytes) {
                    Ok(out) => out,
                    Err(reason) => return self.fatal(current.entry, reason),
                };
                current.info.size_compressed += out.len() as u64;
                self.bytes_emitted += out.len() as u64;

                self.fire(Event::EntryUpdated {
                    entry: &current.entry,
                    info: &current.info,
                });
                self.current = Some(current);
                Ok(out)
            }
            Ok(SourceChunk::Eof) => {
                let tail = match current.compressor.close() {
                    Ok(tail) => tail,
                    Err(reason) => return self.fatal(current.entry, reason),
                };
                current.info.size_compressed += tail.len() as u64;
                current.info.checksum = current.hasher.finalize();

                let mut chunk = tail;
                chunk.extend(records::data_descriptor(&current.info)?);
                self.bytes_emitted += chunk.len() as u64;

                self.fire(Event::EntryCompleted {
                    entry: &current.entry,
                });
                debug!(
                    "entry {} done: {} bytes in, {} bytes out",
                    current.entry.path, current.info.size, current.info.size_compressed
                );
                self.compressor = Some(current.compressor);
                self.encoded.push((current.entry, Ok(current.info)));
                Ok(chunk)
            }
            Err(reason) => {
                // Flush and discard whatever the compressor holds for this
                // entry; the context stays parked for the next one.
                let mut compressor = current.compressor;
                let _ = compressor.close();
                self.compressor = Some(compressor);
                self.entry_failed(current.entry, reason)
            }
        }
    }

    /// Apply the error policy to a failed entry.
    fn entry_failed(&mut self, entry: Entry, reason: Error) -> Result<Vec<u8>> {
        self.fire(Event::EntryFailed {
            entry: &entry,
            reason: &reason,
        });
        match self.on_error {
            ErrorPolicy::Halt => {
                self.phase = Phase::Done;
                self.fire(Event::StreamEnded {
                    result: Err(&reason),
                });
                Err(reason)
            }
            ErrorPolicy::Skip => {
                debug!("skipping entry {}: {}", entry.path, reason);
                self.encoded.push((entry, Err(reason)));
                Ok(Vec::new())
            }
        }
    }

    /// A compressor failure is never skippable.
    fn fatal(&mut self, entry: Entry, reason: Error) -> Result<Vec<u8>> {
        self.phase = Phase::Done;
        self.fire(Event::EntryFailed {
            entry: &entry,
            reason: &reason,
        });
        self.fire(Event::StreamEnded {
            result: Err(&reason),
        });
        Err(reason)
    }

    /// Final step: central directory, ZIP64 trailer, legacy EOCD.
    fn finish_stream(&mut self) -> Result<Vec<u8>> {
        if let Some(compressor) = self.compressor.take() {
            compressor.finalize();
        }

        let cd_offset = self.bytes_emitted;
        let mut chunk = Vec::new();
        let mut entry_count = 0u64;
        for (entry, outcome) in &self.encoded {
            if let Ok(info) = outcome {
                chunk.extend(records::central_file_header(entry, info)?);
                entry_count += 1;
            }
        }
        let cd_size = chunk.len() as u64;
        let zip64_eocd_offset = cd_offset + cd_size;

        chunk.extend(records::zip64_eocd_record(entry_count, cd_size, cd_offset)?);
        chunk.extend(records::zip64_eocd_locator(zip64_eocd_offset)?);
        chunk.extend(records::eocd_record(entry_count, cd_size, cd_offset)?);
        self.bytes_emitted += chunk.len() as u64;

        self.phase = Phase::Done;
        debug!(
            "stream {} ended: {} entries, {} bytes",
            self.stream_id, entry_count, self.bytes_emitted
        );
        self.fire(Event::StreamEnded { result: Ok(()) });
        Ok(chunk)
    }

    /// Drain the whole stream into `sink`, returning the bytes written.
    pub async fn write_to<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next_chunk().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    /// Drain the whole stream into memory. Defeats the point of streaming
    /// for large archives; intended for small outputs and tests.
    pub async fn collect(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend(chunk?);
        }
        Ok(out)
    }
}
