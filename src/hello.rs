//! ClientHello / ServerHello decoding and the ClientHello sanitizer.
//!
//! Both hello messages share a prefix layout: legacy version, 32 bytes of
//! random (the first four of which are a GMT timestamp), a variable-length
//! session ID, cipher suite material, compression material, and an optional
//! trailing extensions block. The walk here is strict: every length field
//! is bounds-checked against its container and nothing may be left over.
//!
//! The sanitizer rebuilds a ClientHello record from its parsed parts rather
//! than patching lengths in place: the record length, handshake length, and
//! inner vector lengths are all recomputed from the final sizes, so the
//! three nested levels can never disagree.

use tracing::{debug, trace};

use crate::error::GuardError;
use crate::protocol::{
    cipher_suite_name, EXT_SERVER_NAME, EXT_SUPPORTED_VERSIONS, HS_CLIENT_HELLO,
    RECORD_HEADER_LEN, TLS13_VERSION,
};

/// Sequential big-endian reader over a byte slice. Every method fails with
/// the supplied `Malformed` label instead of panicking on short input.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GuardError> {
        if self.remaining() < n {
            return Err(GuardError::Malformed { what: self.what });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, GuardError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, GuardError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

/// Borrowed view of a parsed ClientHello body.
pub(crate) struct ClientHello<'a> {
    pub legacy_version: u16,
    pub random: &'a [u8],
    pub session_id: &'a [u8],
    /// Raw cipher-suite vector contents (an even number of bytes).
    pub cipher_suites: &'a [u8],
    /// Raw compression-method vector contents.
    pub compression: &'a [u8],
    /// `None` when the message ends after compression; `Some` carries the
    /// extensions block contents (possibly empty).
    pub extensions: Option<&'a [u8]>,
}

impl ClientHello<'_> {
    /// True when there is nothing for the sanitizer to do.
    pub fn is_clean(&self) -> bool {
        self.session_id.is_empty() && self.extensions.map_or(true, <[u8]>::is_empty)
    }
}

/// Fields of a parsed ServerHello body the supervisor cares about.
pub(crate) struct ServerHello {
    pub legacy_version: u16,
    pub cipher_suite: u16,
    pub compression: u8,
    /// Version selected via the supported_versions extension, if present.
    pub selected_version: Option<u16>,
}

impl ServerHello {
    /// True when the server committed to TLS 1.3, whose handshake the
    /// guard cannot observe past this point.
    pub fn negotiated_tls13(&self) -> bool {
        self.selected_version == Some(TLS13_VERSION)
    }
}

/// Split a handshake record payload into its first message's type and body.
/// `strict` additionally refuses trailing bytes after that message (used
/// for ClientHello records, which the sanitizer must account for in full).
pub(crate) fn handshake_body<'a>(
    payload: &'a [u8],
    strict: bool,
    what: &'static str,
) -> Result<(u8, &'a [u8]), GuardError> {
    if payload.len() < 4 {
        return Err(GuardError::Malformed { what });
    }
    let hs_type = payload[0];
    let hs_len = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]) as usize;
    if payload.len() < 4 + hs_len {
        return Err(GuardError::Malformed { what });
    }
    if strict && payload.len() != 4 + hs_len {
        return Err(GuardError::Malformed { what });
    }
    Ok((hs_type, &payload[4..4 + hs_len]))
}

/// Walk an extensions block with the generic `{type, len, value}` layout,
/// invoking `seen` for each extension. Anything structurally inconsistent
/// is an error.
fn walk_extensions(
    block: &[u8],
    what: &'static str,
    mut seen: impl FnMut(u16, &[u8]),
) -> Result<(), GuardError> {
    let mut r = ByteReader::new(block, what);
    while r.remaining() > 0 {
        let ext_type = r.u16()?;
        let ext_len = r.u16()? as usize;
        let value = r.take(ext_len)?;
        seen(ext_type, value);
    }
    Ok(())
}

/// Parse a ClientHello body (the bytes after the 4-byte message header).
pub(crate) fn parse_client_hello(body: &[u8]) -> Result<ClientHello<'_>, GuardError> {
    const WHAT: &str = "client hello";
    let mut r = ByteReader::new(body, WHAT);

    let legacy_version = r.u16()?;
    let random = r.take(32)?;
    let gmt = u32::from_be_bytes([random[0], random[1], random[2], random[3]]);
    let sess_len = r.u8()? as usize;
    let session_id = r.take(sess_len)?;

    let suites_len = r.u16()? as usize;
    if suites_len % 2 != 0 {
        return Err(GuardError::Malformed { what: WHAT });
    }
    let cipher_suites = r.take(suites_len)?;
    let comp_len = r.u8()? as usize;
    let compression = r.take(comp_len)?;

    let extensions = if r.remaining() == 0 {
        None
    } else {
        let ext_len = r.u16()? as usize;
        let block = r.take(ext_len)?;
        if r.remaining() != 0 {
            return Err(GuardError::Malformed { what: WHAT });
        }
        walk_extensions(block, WHAT, |ext_type, _| {
            if ext_type == EXT_SERVER_NAME {
                debug!("client hello carries a server_name extension");
            }
            trace!(ext_type, "client hello extension");
        })?;
        Some(block)
    };

    trace!(
        version = format_args!("{legacy_version:#06x}"),
        gmt,
        session_id_len = session_id.len(),
        compression_methods = compression.len(),
        extensions_len = extensions.map_or(0, <[u8]>::len),
        "client hello parsed"
    );
    for suite in cipher_suites.chunks_exact(2) {
        let suite = u16::from_be_bytes([suite[0], suite[1]]);
        trace!(
            suite = format_args!("{suite:#06x}"),
            name = cipher_suite_name(suite),
            "client offered cipher suite"
        );
    }

    Ok(ClientHello {
        legacy_version,
        random,
        session_id,
        cipher_suites,
        compression,
        extensions,
    })
}

/// Parse a ServerHello body. Trailing extensions are walked so a TLS 1.3
/// selection cannot slip by.
pub(crate) fn parse_server_hello(body: &[u8]) -> Result<ServerHello, GuardError> {
    const WHAT: &str = "server hello";
    let mut r = ByteReader::new(body, WHAT);

    let legacy_version = r.u16()?;
    let random = r.take(32)?;
    let gmt = u32::from_be_bytes([random[0], random[1], random[2], random[3]]);
    let sess_len = r.u8()? as usize;
    r.take(sess_len)?;

    let cipher_suite = r.u16()?;
    let compression = r.u8()?;

    let mut selected_version = None;
    if r.remaining() > 0 {
        let ext_len = r.u16()? as usize;
        let block = r.take(ext_len)?;
        if r.remaining() != 0 {
            return Err(GuardError::Malformed { what: WHAT });
        }
        walk_extensions(block, WHAT, |ext_type, value| {
            if ext_type == EXT_SUPPORTED_VERSIONS && value.len() == 2 {
                selected_version = Some(u16::from_be_bytes([value[0], value[1]]));
            }
            trace!(ext_type, "server hello extension");
        })?;
    }

    let hello = ServerHello {
        legacy_version,
        cipher_suite,
        compression,
        selected_version,
    };
    debug!(
        version = format_args!("{:#06x}", hello.legacy_version),
        gmt,
        suite = format_args!("{:#06x}", hello.cipher_suite),
        suite_name = cipher_suite_name(hello.cipher_suite),
        compression = hello.compression,
        "server hello parsed"
    );
    Ok(hello)
}

/// Build the sanitized replacement for a ClientHello record, or `None`
/// when the input is already clean (no session ID, no extension content) —
/// in that case the original bytes are forwarded untouched.
///
/// The rewritten record empties the session ID and elides the extensions
/// block contents. When the input carried an extensions-length field, the
/// output retains it as `0x0000` (an empty vector, not an absent one).
pub(crate) fn sanitize_client_hello(
    record: &[u8],
    hello: &ClientHello<'_>,
) -> Option<Vec<u8>> {
    if hello.is_clean() {
        return None;
    }

    let body_len = 2 // legacy version
        + hello.random.len()
        + 1 // empty session id
        + 2 + hello.cipher_suites.len()
        + 1 + hello.compression.len()
        + if hello.extensions.is_some() { 2 } else { 0 };

    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + 4 + body_len);
    // Record header: original type and version, recomputed length.
    out.extend_from_slice(&record[..3]);
    out.extend_from_slice(&((4 + body_len) as u16).to_be_bytes());
    // Handshake header: type plus 24-bit length.
    out.push(HS_CLIENT_HELLO);
    out.extend_from_slice(&(body_len as u32).to_be_bytes()[1..]);
    // Body.
    out.extend_from_slice(&hello.legacy_version.to_be_bytes());
    out.extend_from_slice(hello.random);
    out.push(0);
    out.extend_from_slice(&(hello.cipher_suites.len() as u16).to_be_bytes());
    out.extend_from_slice(hello.cipher_suites);
    out.push(hello.compression.len() as u8);
    out.extend_from_slice(hello.compression);
    if hello.extensions.is_some() {
        out.extend_from_slice(&0u16.to_be_bytes());
    }

    debug!(
        original_len = record.len(),
        sanitized_len = out.len(),
        stripped_session_id = hello.session_id.len(),
        stripped_extensions = hello.extensions.map_or(0, <[u8]>::len),
        "client hello sanitized"
    );
    Some(out)
}
