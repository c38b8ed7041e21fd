//! Per-chunk sub-readers over a shared upstream stream.
//!
//! A [`StreamShard`] covers exactly one chunk's worth of reads. The driver
//! creates it, the chunk's consumer reads through it and closes it, and the
//! close fires a completion signal telling the driver it is safe to build
//! the shard for the next chunk. A one-byte carry moves the byte consumed
//! by the previous shard's EOF probe into the next shard.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Mutex};

/// Last upstream status a shard observed. `io::Error` is not `Clone`, so
/// the shard keeps this instead; end-of-stream values terminate the
/// producer loop rather than failing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardError {
    /// Read attempted after `close`.
    Closed,
    /// Upstream is cleanly exhausted.
    Eof,
    /// Upstream ended inside a structure it promised to complete.
    UnexpectedEof,
    /// Any other upstream failure.
    Upstream(String),
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardError::Closed => write!(f, "shard closed"),
            ShardError::Eof => write!(f, "end of stream"),
            ShardError::UnexpectedEof => write!(f, "unexpected end of stream"),
            ShardError::Upstream(msg) => write!(f, "{msg}"),
        }
    }
}

fn shard_error_from(e: &io::Error) -> ShardError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => ShardError::UnexpectedEof,
        _ => ShardError::Upstream(e.to_string()),
    }
}

/// Closable handle to the upload's upstream reader, shared by every shard
/// of one upload. The shard completion handshake guarantees a single
/// reader at any instant; this type only provides the shared ownership and
/// the close lever used to simulate losing the connection mid-upload.
#[derive(Clone)]
pub struct SharedReader {
    inner: Arc<Mutex<Option<Box<dyn AsyncRead + Unpin + Send>>>>,
}

impl SharedReader {
    pub fn new(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(reader)))),
        }
    }

    /// Drop the underlying reader; subsequent reads fail.
    pub async fn close(&self) {
        *self.inner.lock().await = None;
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(reader) => reader.read(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upstream reader closed",
            )),
        }
    }
}

struct ShardState {
    upstream: SharedReader,
    carry: Option<u8>,
    n: u64,
    err: Option<ShardError>,
}

/// One chunk's window onto the upstream stream.
pub struct StreamShard {
    state: Mutex<ShardState>,
    closed: AtomicBool,
    signal_tx: watch::Sender<bool>,
}

impl StreamShard {
    /// `carry` is the byte pulled by the previous shard's peek; it is the
    /// first byte this shard emits.
    pub fn new(upstream: SharedReader, carry: Option<u8>) -> Arc<Self> {
        let (signal_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(ShardState {
                upstream,
                carry,
                n: 0,
                err: None,
            }),
            closed: AtomicBool::new(false),
            signal_tx,
        })
    }

    /// Read once from the shard: the carry byte first (if present), then a
    /// single upstream read. A clean upstream end is recorded and shows as
    /// a short count, never as an error.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream shard already closed",
            ));
        }
        let mut state = self.state.lock().await;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut offset = 0;
        if let Some(byte) = state.carry.take() {
            buf[0] = byte;
            state.n += 1;
            offset = 1;
        }
        if offset == buf.len() {
            return Ok(offset);
        }
        match state.upstream.read(&mut buf[offset..]).await {
            Ok(0) => {
                state.err = Some(ShardError::Eof);
                Ok(offset)
            }
            Ok(n) => {
                state.n += n as u64;
                Ok(offset + n)
            }
            Err(e) => {
                state.err = Some(shard_error_from(&e));
                Err(e)
            }
        }
    }

    /// Read until `buf` is full or the upstream ends; returns the bytes
    /// actually filled. The rest of the buffer is left untouched, so a
    /// zeroed buffer comes back zero-padded.
    pub async fn read_full(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Ensure the carry holds one unread byte, pulling it from the
    /// upstream if needed. `Ok(None)` means the upstream is exhausted.
    /// Idempotent while the carry is occupied.
    pub async fn peek(&self) -> io::Result<Option<u8>> {
        let mut state = self.state.lock().await;
        if let Some(byte) = state.carry {
            return Ok(Some(byte));
        }
        let mut byte = [0u8; 1];
        match state.upstream.read(&mut byte).await {
            Ok(0) => {
                state.err = Some(ShardError::Eof);
                Ok(None)
            }
            Ok(_) => {
                state.carry = Some(byte[0]);
                Ok(Some(byte[0]))
            }
            Err(e) => {
                state.err = Some(shard_error_from(&e));
                Err(e)
            }
        }
    }

    /// Cumulative bytes read through this shard and the last upstream
    /// status observed.
    pub async fn result(&self) -> (u64, Option<ShardError>) {
        let state = self.state.lock().await;
        (state.n, state.err.clone())
    }

    /// Mark the shard consumed and fire the completion signal exactly once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.signal_tx.send_replace(true);
        }
    }

    /// Completion signal; resolves to `true` once the shard is closed.
    pub fn signal(&self) -> watch::Receiver<bool> {
        self.signal_tx.subscribe()
    }
}
