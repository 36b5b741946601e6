//! TLS record framing engine.
//!
//! One `RecordReader` runs per direction. It converts a raw byte stream
//! into a sequence of well-framed records, each delivered to the supervisor
//! over a shared channel and tagged with its origin. Framing never
//! desynchronizes: a record is emitted only once `header || body` has been
//! read in full.
//!
//! Key design principles:
//! - Explicit framing stages (header, then body) with incremental,
//!   cancel-safe accumulation — partial reads never lose data.
//! - Every read is bounded by an inactivity deadline that resets after
//!   each successful read, so slow handshakes made of individually fast
//!   reads still succeed.
//! - A shutdown signal is observed at every read suspension point; on
//!   shutdown any partial buffer is handed over once for draining, then a
//!   single terminal acknowledgement is emitted.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::error::GuardError;
use crate::protocol::{
    MAX_PLAINTEXT_LEN, MIN_VERSION_MAJOR, MIN_VERSION_MINOR, RECORD_HEADER_LEN,
};

/// Which peer a record (or reader event) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    /// The peer a record from this origin is forwarded to.
    pub fn opposite(self) -> Origin {
        match self {
            Origin::Client => Origin::Server,
            Origin::Server => Origin::Client,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Client => f.write_str("client"),
            Origin::Server => f.write_str("server"),
        }
    }
}

/// One fully framed TLS record: the 5-byte header plus its payload.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub origin: Origin,
    pub content_type: u8,
    /// `header || payload`, exactly `RECORD_HEADER_LEN + length` bytes.
    pub data: Bytes,
}

impl Record {
    /// Record payload (bytes after the 5-byte header).
    pub fn payload(&self) -> &[u8] {
        &self.data[RECORD_HEADER_LEN..]
    }
}

/// Everything a reader can hand to the supervisor.
#[derive(Debug)]
pub(crate) enum ReaderEvent {
    /// A complete record.
    Record(Record),
    /// Bytes of an unfinished record, flushed once on shutdown so the
    /// supervisor can drain them to the peer.
    Partial { origin: Origin, data: Bytes },
    /// Terminal acknowledgement: the reader has stopped cleanly.
    Eos { origin: Origin },
    /// Terminal failure: the reader has stopped on an error.
    Failed { origin: Origin, error: GuardError },
}

/// Outcome of framing one record.
enum Framed {
    /// A complete record was read.
    Record(Record),
    /// The shutdown signal arrived; any partial bytes are carried along.
    Shutdown { partial: Bytes },
    /// Reading failed terminally.
    Failed(GuardError),
}

/// Framing engine for one direction of the connection pairing.
pub(crate) struct RecordReader {
    origin: Origin,
    read_timeout: Duration,
}

impl RecordReader {
    pub fn new(origin: Origin, read_timeout: Duration) -> Self {
        Self {
            origin,
            read_timeout,
        }
    }

    /// Frame records from `stream` until shutdown or a terminal error,
    /// sending each to the supervisor. Exactly one terminal event
    /// (`Eos` or `Failed`) is emitted. Returns the stream so the caller
    /// can reunite its halves.
    pub async fn run<R>(
        self,
        mut stream: R,
        events: mpsc::Sender<ReaderEvent>,
        mut done: watch::Receiver<bool>,
    ) -> R
    where
        R: AsyncRead + Unpin,
    {
        let origin = self.origin;
        loop {
            match self.next_record(&mut stream, &mut done).await {
                Framed::Record(record) => {
                    if events.send(ReaderEvent::Record(record)).await.is_err() {
                        // Supervisor is gone; nothing left to report to.
                        break;
                    }
                }
                Framed::Shutdown { partial } => {
                    debug!(%origin, partial = partial.len(), "reader shutting down");
                    if !partial.is_empty() {
                        let _ = events
                            .send(ReaderEvent::Partial {
                                origin,
                                data: partial,
                            })
                            .await;
                    }
                    let _ = events.send(ReaderEvent::Eos { origin }).await;
                    break;
                }
                Framed::Failed(error) => {
                    debug!(%origin, %error, "reader terminating on error");
                    let _ = events.send(ReaderEvent::Failed { origin, error }).await;
                    break;
                }
            }
        }
        stream
    }

    /// Read one record: exactly 5 header bytes, then exactly `length` body
    /// bytes, each read bounded by the inactivity deadline.
    async fn next_record<R>(&self, stream: &mut R, done: &mut watch::Receiver<bool>) -> Framed
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN);

        // Stage 1: header.
        if let Some(framed) = self.fill(stream, done, &mut buf, RECORD_HEADER_LEN).await {
            return framed;
        }

        let content_type = buf[0];
        let (major, minor) = (buf[1], buf[2]);
        let length = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        trace!(
            origin = %self.origin,
            content_type,
            version = format_args!("{major}.{minor}"),
            length,
            "record header framed"
        );

        if major < MIN_VERSION_MAJOR || minor < MIN_VERSION_MINOR {
            return Framed::Failed(GuardError::Version {
                origin: self.origin,
                major,
                minor,
            });
        }
        if length > MAX_PLAINTEXT_LEN {
            return Framed::Failed(GuardError::Oversize {
                origin: self.origin,
                len: length,
            });
        }

        // Stage 2: body.
        buf.reserve(length);
        if let Some(framed) = self
            .fill(stream, done, &mut buf, RECORD_HEADER_LEN + length)
            .await
        {
            return framed;
        }

        Framed::Record(Record {
            origin: self.origin,
            content_type,
            data: buf.freeze(),
        })
    }

    /// Accumulate into `buf` until it holds `target` bytes. Returns
    /// `Some(..)` when framing cannot continue (shutdown, timeout, EOF,
    /// I/O failure); `None` once the target is reached.
    async fn fill<R>(
        &self,
        stream: &mut R,
        done: &mut watch::Receiver<bool>,
        buf: &mut BytesMut,
        target: usize,
    ) -> Option<Framed>
    where
        R: AsyncRead + Unpin,
    {
        while buf.len() < target {
            // Reads win over the shutdown signal so that records already
            // sitting in the stream when shutdown arrives are still framed
            // and drained; shutdown is honored as soon as the stream has
            // nothing ready. A dropped sender is the same as the signal:
            // the supervisor has gone away and the reader must stop.
            //
            // The read is capped at the record boundary so bytes of the
            // next record are never pulled out of the stream early.
            let read = {
                let remaining = target - buf.len();
                let mut dst = (&mut *buf).limit(remaining);
                tokio::select! {
                    biased;
                    read = tokio::time::timeout(self.read_timeout, stream.read_buf(&mut dst)) => Some(read),
                    _ = done.changed() => None,
                }
            };
            let Some(read) = read else {
                return Some(Framed::Shutdown {
                    partial: buf.split().freeze(),
                });
            };
            match read {
                Err(_elapsed) => {
                    return Some(Framed::Failed(GuardError::Timeout {
                        origin: self.origin,
                    }));
                }
                Ok(Err(err)) => {
                    return Some(Framed::Failed(GuardError::io(self.origin, err)));
                }
                Ok(Ok(0)) => {
                    return Some(Framed::Failed(GuardError::Eof {
                        origin: self.origin,
                    }));
                }
                Ok(Ok(_)) => {}
            }
        }
        None
    }
}
