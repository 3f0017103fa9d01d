//! Bounded producer/consumer buffer between the HTTP fetch task and the
//! encoder.
//!
//! The buffer runs as its own task owning an inbox of requests; callers
//! interact through [`BufferHandle`] and block only on their oneshot reply.
//! That gives the three ordering rules the download pipeline needs:
//! `read` never blocks, `data` blocks while the buffer is at capacity, and
//! `finish` is acknowledged only after everything queued has drained.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};

/// Reply to a `read` request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BufferRead {
    /// Everything queued at the time of the call; empty when nothing was.
    Data(Vec<u8>),
    /// The producer finished and the queue is drained.
    Eof,
}

/// The buffer task went away (pipeline shut down).
#[derive(Debug)]
pub(crate) struct BufferClosed;

enum Request {
    Data {
        chunk: Vec<u8>,
        reply: oneshot::Sender<()>,
    },
    Read {
        reply: oneshot::Sender<BufferRead>,
    },
    Finish {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub(crate) struct BufferHandle {
    tx: mpsc::Sender<Request>,
}

impl BufferHandle {
    /// Spawn a buffer task bounded at `capacity` queued bytes.
    pub fn spawn(capacity: usize) -> BufferHandle {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run(rx, capacity));
        BufferHandle { tx }
    }

    /// Enqueue a chunk. Resolves once the buffer accepted it, which may be
    /// deferred until a `read` frees capacity.
    pub async fn data(&self, chunk: Vec<u8>) -> Result<(), BufferClosed> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Request::Data { chunk, reply })
            .await
            .map_err(|_| BufferClosed)?;
        done.await.map_err(|_| BufferClosed)
    }

    /// Drain everything queued. Never waits for the producer.
    pub async fn read(&self) -> Result<BufferRead, BufferClosed> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Request::Read { reply })
            .await
            .map_err(|_| BufferClosed)?;
        answer.await.map_err(|_| BufferClosed)
    }

    /// Mark the payload complete. Resolves once the queue has drained.
    pub async fn finish(&self) -> Result<(), BufferClosed> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Request::Finish { reply })
            .await
            .map_err(|_| BufferClosed)?;
        done.await.map_err(|_| BufferClosed)
    }
}

struct State {
    queued: VecDeque<Vec<u8>>,
    queued_bytes: usize,
    capacity: usize,
    finished: bool,
    deferred_data: VecDeque<(Vec<u8>, oneshot::Sender<()>)>,
    deferred_finish: Option<oneshot::Sender<()>>,
}

impl State {
    fn enqueue(&mut self, chunk: Vec<u8>) {
        self.queued_bytes += chunk.len();
        self.queued.push_back(chunk);
    }

    fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.queued_bytes);
        while let Some(chunk) = self.queued.pop_front() {
            out.extend(chunk);
        }
        self.queued_bytes = 0;
        out
    }

    /// Wake deferred producers in arrival order while capacity lasts, then
    /// a deferred finish if nothing remains in front of it.
    fn admit_deferred(&mut self) {
        while self.queued_bytes < self.capacity {
            match self.deferred_data.pop_front() {
                Some((chunk, reply)) => {
                    self.enqueue(chunk);
                    let _ = reply.send(());
                }
                None => break,
            }
        }
        if self.queued_bytes == 0 && self.deferred_data.is_empty() {
            if let Some(reply) = self.deferred_finish.take() {
                self.finished = true;
                let _ = reply.send(());
            }
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Request>, capacity: usize) {
    let mut state = State {
        queued: VecDeque::new(),
        queued_bytes: 0,
        capacity,
        finished: false,
        deferred_data: VecDeque::new(),
        deferred_finish: None,
    };

    while let Some(request) = rx.recv().await {
        match request {
            Request::Data { chunk, reply } => {
                if state.queued_bytes >= state.capacity {
                    state.deferred_data.push_back((chunk, reply));
                } else {
                    state.enqueue(chunk);
                    let _ = reply.send(());
                }
            }
            Request::Read { reply } => {
                if state.finished {
                    let _ = reply.send(BufferRead::Eof);
                } else {
                    let drained = state.drain();
                    let _ = reply.send(BufferRead::Data(drained));
                    state.admit_deferred();
                }
            }
            Request::Finish { reply } => {
                if state.queued_bytes == 0 && state.deferred_data.is_empty() {
                    state.finished = true;
                    let _ = reply.send(());
                } else {
                    state.deferred_finish = Some(reply);
                }
            }
        }
    }
    // Inbox closed: deferred reply senders drop here, waking any blocked
    // producer with a channel error.
}
