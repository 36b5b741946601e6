//! Transparent TLS handshake inspector and sanitizer.
//!
//! `tlsguard` sits between a local client and a remote server, forwarding
//! bytes in both directions while (a) validating the server's X.509
//! certificate chain against an expected hostname, and (b) neutralizing
//! privacy-relevant fields in the ClientHello — the session ID (blocking
//! session resumption) and the extensions block (stripping SNI and other
//! identifying extensions) — before they reach the server. It never
//! terminates TLS: it is a byte-accurate, length-preserving rewriter
//! operating on the live record stream between two peers.
//!
//! Once the certificate chain is validated (or the server indicates it
//! will not present one in the clear), the guard steps out, drains the
//! in-flight records, and hands both streams back to the caller.
//!
//! ```rust,no_run
//! # async fn example(client: tokio::net::TcpStream, server: tokio::net::TcpStream)
//! #     -> Result<(), tlsguard::GuardError> {
//! let (client, server) = tlsguard::guard(client, server, "example.com").await?;
//! // handshake observed and validated; keep relaying client <-> server
//! # Ok(())
//! # }
//! ```
//!
//! TLS 1.0 through 1.2 handshakes are supported. A server that selects
//! TLS 1.3 fails closed, as its certificate is not observable on the wire
//! (a sanitized ClientHello cannot negotiate 1.3 in the first place, since
//! stripping extensions removes supported_versions).

mod chain;
mod error;
mod guard;
mod hello;
pub mod protocol;
mod record;

pub use error::GuardError;
pub use guard::{guard, Guard, GuardConfig, DEFAULT_READ_TIMEOUT};
pub use record::Origin;
