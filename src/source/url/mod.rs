//! HTTP(S) payload source.
//!
//! Each URL source owns a small pipeline of three tasks:
//!
//! - a **fetch task** that issues the request and pushes body chunks
//!   downstream,
//! - a bounded **buffer** task ([`buffer`]) that absorbs the push-driven
//!   delivery and hands it to the encoder's pull-driven reads, and
//! - a **reader** actor that tracks connection state (`connecting`,
//!   `connected`, `error`) and parks callers until the outcome is known.
//!
//! Splitting backpressure (buffer) from connection lifecycle (reader) keeps
//! the consumer-side `read` strictly non-blocking relative to the network
//! and preserves the difference between a payload that ended cleanly and
//! one that was cut off: a clean end finishes the buffer, an abortive end
//! leaves it unfinished and parks the failure in the reader instead.

mod buffer;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::source::{PayloadSource, SourceChunk};
use buffer::{BufferHandle, BufferRead};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-source tuning for URL downloads.
#[derive(Debug, Clone)]
pub struct UrlOptions {
    /// Bound on bytes queued between the download and the encoder.
    pub buffer_capacity: usize,
}

impl Default for UrlOptions {
    fn default() -> Self {
        UrlOptions {
            buffer_capacity: 1024 * 1024,
        }
    }
}

/// Why a download could not deliver its full payload.
#[derive(Debug, Clone)]
enum UrlFailure {
    Connect(String),
    Status(u16),
    Aborted(String),
}

impl From<UrlFailure> for Error {
    fn from(failure: UrlFailure) -> Error {
        match failure {
            UrlFailure::Connect(reason) => Error::Connect(reason),
            UrlFailure::Status(code) => Error::HttpStatus(code),
            UrlFailure::Aborted(reason) => Error::Truncated(reason),
        }
    }
}

enum ReaderMsg {
    /// External: resolve once the connection outcome is known.
    Connect {
        reply: oneshot::Sender<std::result::Result<(), UrlFailure>>,
    },
    /// External: hand out the buffer once connected.
    Read {
        reply: oneshot::Sender<std::result::Result<BufferHandle, UrlFailure>>,
    },
    /// From the fetch task: a 200 response arrived.
    Connected,
    /// From the fetch task: connection, status, or mid-body failure.
    Failed(UrlFailure),
}

enum ReaderState {
    Connecting { waiting: Vec<ReaderMsg> },
    Connected,
    Error(UrlFailure),
}

async fn run_reader(mut rx: mpsc::Receiver<ReaderMsg>, buffer: BufferHandle) {
    let mut state = ReaderState::Connecting {
        waiting: Vec::new(),
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            msg @ (ReaderMsg::Connect { .. } | ReaderMsg::Read { .. }) => match &mut state {
                ReaderState::Connecting { waiting } => waiting.push(msg),
                ReaderState::Connected => answer(msg, Ok(&buffer)),
                ReaderState::Error(failure) => {
                    let failure = failure.clone();
                    answer(msg, Err(failure));
                }
            },
            ReaderMsg::Connected => {
                if let ReaderState::Connecting { waiting } = &mut state {
                    for msg in waiting.drain(..) {
                        answer(msg, Ok(&buffer));
                    }
                    state = ReaderState::Connected;
                }
            }
            ReaderMsg::Failed(failure) => {
                if let ReaderState::Connecting { waiting } = &mut state {
                    for msg in waiting.drain(..) {
                        answer(msg, Err(failure.clone()));
                    }
                }
                // A failure after `connected` still flips the state, so
                // later reads surface the abort instead of a clean eof.
                state = ReaderState::Error(failure);
            }
        }
    }
}

fn answer(msg: ReaderMsg, outcome: std::result::Result<&BufferHandle, UrlFailure>) {
    match msg {
        ReaderMsg::Connect { reply } => {
            let _ = reply.send(outcome.map(|_| ()));
        }
        ReaderMsg::Read { reply } => {
            let _ = reply.send(outcome.map(BufferHandle::clone));
        }
        ReaderMsg::Connected | ReaderMsg::Failed(_) => {}
    }
}

/// Issue the request and pump body chunks into the buffer. Backpressure is
/// the buffer's `data` call; a closed buffer means the consumer went away.
async fn fetch_body(client: Client, url: String, buffer: BufferHandle, tx: mpsc::Sender<ReaderMsg>) {
    let mut response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("connection to {} failed: {}", url, e);
            let _ = tx
                .send(ReaderMsg::Failed(UrlFailure::Connect(e.to_string())))
                .await;
            return;
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        warn!("{} answered {}", url, status);
        let _ = tx
            .send(ReaderMsg::Failed(UrlFailure::Status(status.as_u16())))
            .await;
        return;
    }

    debug!("connected to {}", url);
    let _ = tx.send(ReaderMsg::Connected).await;

    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                if buffer.data(bytes.to_vec()).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = buffer.finish().await;
                return;
            }
            Err(e) => {
                warn!("transfer from {} aborted: {}", url, e);
                let _ = tx
                    .send(ReaderMsg::Failed(UrlFailure::Aborted(e.to_string())))
                    .await;
                return;
            }
        }
    }
}

/// Owner of one download pipeline. Dropping it aborts the fetch task and
/// the reader actor; the buffer task exits once its last handle is gone.
struct UrlReader {
    tx: mpsc::Sender<ReaderMsg>,
    fetch: JoinHandle<()>,
    actor: JoinHandle<()>,
}

impl UrlReader {
    fn spawn(url: String, options: &UrlOptions) -> Result<UrlReader> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Connect(e.to_string()))?;

        let buffer = BufferHandle::spawn(options.buffer_capacity);
        let (tx, rx) = mpsc::channel(16);
        let actor = tokio::spawn(run_reader(rx, buffer.clone()));
        let fetch = tokio::spawn(fetch_body(client, url, buffer, tx.clone()));
        Ok(UrlReader { tx, fetch, actor })
    }

    /// Resolves once the connection outcome is known.
    #[allow(dead_code)]
    async fn connect(&self) -> Result<()> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(ReaderMsg::Connect { reply })
            .await
            .map_err(|_| Error::Truncated("reader terminated".to_string()))?;
        answer
            .await
            .map_err(|_| Error::Truncated("reader terminated".to_string()))?
            .map_err(Error::from)
    }

    /// The buffer handle, once connected; the failure reason otherwise.
    async fn read(&self) -> Result<BufferHandle> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(ReaderMsg::Read { reply })
            .await
            .map_err(|_| Error::Truncated("reader terminated".to_string()))?;
        answer
            .await
            .map_err(|_| Error::Truncated("reader terminated".to_string()))?
            .map_err(Error::from)
    }

    fn shutdown(&self) {
        self.fetch.abort();
        self.actor.abort();
    }
}

impl Drop for UrlReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Payload source that streams one HTTP(S) download.
pub(in crate::source) struct UrlSource {
    reader: UrlReader,
}

impl UrlSource {
    pub fn spawn(url: String, options: &UrlOptions) -> Result<UrlSource> {
        Ok(UrlSource {
            reader: UrlReader::spawn(url, options)?,
        })
    }
}

#[async_trait]
impl PayloadSource for UrlSource {
    async fn read(&mut self) -> Result<SourceChunk> {
        let buffer = match self.reader.read().await {
            Ok(buffer) => buffer,
            Err(e) => {
                self.reader.shutdown();
                return Err(e);
            }
        };
        match buffer.read().await {
            Ok(BufferRead::Data(bytes)) => Ok(SourceChunk::Data(bytes)),
            Ok(BufferRead::Eof) => {
                self.reader.shutdown();
                Ok(SourceChunk::Eof)
            }
            Err(_) => {
                self.reader.shutdown();
                Err(Error::Truncated("download pipeline terminated".to_string()))
            }
        }
    }
}
