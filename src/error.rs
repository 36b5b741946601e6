//! Terminal error taxonomy for the guard.
//!
//! Every variant ends the connection pairing; nothing here is recoverable.
//! The first error raised by either record reader or by the supervisor's
//! dispatch becomes the guard's return value.

use std::io;

use thiserror::Error;

use crate::record::Origin;

#[derive(Debug, Error)]
pub enum GuardError {
    // ----- framing -----
    /// Record header carried a protocol version below 3.1.
    #[error("{origin} record version {major}.{minor} below supported minimum 3.1")]
    Version {
        origin: Origin,
        major: u8,
        minor: u8,
    },

    /// Record length field exceeded the plaintext cap.
    #[error("{origin} record length {len} exceeds plaintext maximum of 16384")]
    Oversize { origin: Origin, len: usize },

    // ----- protocol -----
    /// A handshake message type other than the one the state machine allows.
    #[error("{origin} sent handshake type {got:#x} but expected {expected:#x}")]
    UnexpectedHandshake {
        origin: Origin,
        got: u8,
        expected: u8,
    },

    /// ChangeCipherSpec record with the wrong length or payload.
    #[error("change cipher spec record malformed ({reason})")]
    BadChangeCipherSpec { reason: &'static str },

    /// Record content type outside 20..=23.
    #[error("unknown record content type {0:#x}")]
    UnknownContentType(u8),

    /// A handshake structure that does not decode (truncation, a length
    /// field overrunning its container, trailing bytes).
    #[error("malformed {what}")]
    Malformed { what: &'static str },

    /// The server selected TLS 1.3; the guard cannot inspect that handshake.
    #[error("server negotiated TLS 1.3, which is not supported")]
    Tls13NotSupported,

    // ----- peer-signalled termination -----
    /// A fatal alert arrived from either peer.
    #[error("fatal alert received (description {description})")]
    FatalAlert { description: u16 },

    /// close_notify arrived before the handshake reached a decisive point.
    #[error("close_notify alert received during handshake")]
    CloseNotify,

    // ----- certificate -----
    /// The Certificate handshake message itself does not decode.
    #[error("malformed certificate message ({reason})")]
    BadCertificateMessage { reason: &'static str },

    /// X.509 parsing or chain verification failed.
    #[error("certificate chain rejected: {0}")]
    CertificateRejected(#[from] webpki::Error),

    /// The caller-supplied FQDN is not a valid DNS name.
    #[error("invalid DNS name for verification")]
    BadDnsName,

    // ----- transport -----
    /// A read exceeded the inactivity deadline.
    #[error("{origin} read exceeded inactivity deadline")]
    Timeout { origin: Origin },

    /// Stream I/O failure (reset, broken pipe, write failure).
    #[error("{origin} stream error: {source}")]
    Io {
        origin: Origin,
        #[source]
        source: io::Error,
    },

    /// The peer closed its stream before the handshake reached a decisive
    /// point (between records or mid-record).
    #[error("{origin} stream closed during handshake")]
    Eof { origin: Origin },

    // ----- invariant -----
    /// Drain completed without a validated certificate chain.
    #[error("connection drained but certificate chain was never validated")]
    ChainNotValidated,
}

impl GuardError {
    pub(crate) fn io(origin: Origin, source: io::Error) -> Self {
        GuardError::Io { origin, source }
    }
}
