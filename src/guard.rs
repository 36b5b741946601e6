//! Guard supervisor.
//!
//! Owns the two record readers, sequences the expected handshake message
//! types per direction, dispatches each framed record to pass-through,
//! rewrite, or certificate validation, and drains the in-flight stream
//! once the handshake reaches a decisive point.
//!
//! Layout of one connection pairing:
//!
//! ```text
//!             ┌──────────────┐   events (mpsc)   ┌──────────────┐
//!  client ──> │ RecordReader │ ────────┐ ┌────── │ RecordReader │ <── server
//!             └──────▲───────┘         │ │       └───────▲──────┘
//!                    │            ┌────▼─▼────┐          │
//!                    └─ done ──── │ Supervisor│ ─── done ┘
//!                       (watch)   └────┬─┬────┘  (watch)
//!                                      │ │
//!  client <─────── writes ─────────────┘ └───────── writes ──────> server
//! ```
//!
//! All writes happen on the supervisor, synchronously with respect to
//! dispatch, so per-direction record order on each outgoing socket matches
//! arrival order.

use std::time::Duration;

use rustls_pki_types::TrustAnchor;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::chain;
use crate::error::GuardError;
use crate::hello;
use crate::protocol::{
    alert_description_name, handshake_type_name, ALERT_CLOSE_NOTIFY, ALERT_LEVEL_FATAL,
    ALERT_LEVEL_WARNING, CONTENT_ALERT, CONTENT_APPLICATION_DATA, CONTENT_CHANGE_CIPHER_SPEC,
    CONTENT_HANDSHAKE, HS_CERTIFICATE, HS_CERTIFICATE_REQUEST, HS_CERTIFICATE_STATUS,
    HS_CLIENT_HELLO, HS_HELLO_REQUEST, HS_SERVER_HELLO, HS_SERVER_HELLO_DONE,
};
use crate::record::{Origin, Record, ReaderEvent, RecordReader};

/// Depth of the record channel between the readers and the supervisor.
const EVENT_QUEUE_DEPTH: usize = 8;

/// Per-read inactivity deadline applied to both directions.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a [`Guard`].
pub struct GuardConfig {
    /// Inactivity deadline for every socket read; reset after each
    /// successful read.
    pub read_timeout: Duration,
    /// Trust anchors for certificate chain verification.
    pub roots: Vec<TrustAnchor<'static>>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        }
    }
}

/// Transparent TLS handshake inspector and sanitizer.
///
/// Sits between an already-connected client and server, forwarding the
/// record stream while validating the server certificate chain against an
/// expected hostname and stripping the session ID and extensions out of
/// the ClientHello. See [`Guard::run`].
pub struct Guard {
    config: GuardConfig,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Supervise the handshake between `client` and `server`.
    ///
    /// `fqdn` is the DNS name the server certificate must match; empty
    /// skips the hostname constraint (the chain is still verified).
    ///
    /// On success both streams are handed back, positioned just past the
    /// drained handshake records, and are never shut down by the guard.
    /// On error the first terminal failure is returned once both readers
    /// have stopped.
    pub async fn run<C, S>(
        &self,
        client: C,
        server: S,
        fqdn: &str,
    ) -> Result<(C, S), GuardError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(fqdn, "guarding TLS handshake");
        let (client_rd, client_wr) = tokio::io::split(client);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (done_tx, done_rx) = watch::channel(false);

        let client_reader = RecordReader::new(Origin::Client, self.config.read_timeout).run(
            client_rd,
            events_tx.clone(),
            done_rx.clone(),
        );
        let server_reader = RecordReader::new(Origin::Server, self.config.read_timeout).run(
            server_rd,
            events_tx,
            done_rx,
        );
        let supervisor = Supervisor {
            fqdn,
            roots: &self.config.roots,
            client_wr,
            server_wr,
            client_expected: Some(HS_CLIENT_HELLO),
            server_phase: ServerPhase::AwaitHello,
            chain_validated: false,
            done_count: 0,
        }
        .run(events_rx, done_tx);

        let (client_rd, server_rd, (client_wr, server_wr, outcome)) =
            tokio::join!(client_reader, server_reader, supervisor);
        outcome?;
        Ok((client_rd.unsplit(client_wr), server_rd.unsplit(server_wr)))
    }
}

/// Convenience entry: [`Guard::run`] with the default configuration.
pub async fn guard<C, S>(client: C, server: S, fqdn: &str) -> Result<(C, S), GuardError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    Guard::new(GuardConfig::default()).run(client, server, fqdn).await
}

/// Where the server-side expected-message machine stands.
enum ServerPhase {
    AwaitHello,
    AwaitCertificate,
}

struct Supervisor<'a, C, S> {
    fqdn: &'a str,
    roots: &'a [TrustAnchor<'static>],
    client_wr: WriteHalf<C>,
    server_wr: WriteHalf<S>,
    /// `Some(type)` while the first client handshake message is still
    /// outstanding; `None` once the client side passes through.
    client_expected: Option<u8>,
    server_phase: ServerPhase,
    chain_validated: bool,
    /// Terminal reader events seen so far (0..=2).
    done_count: u8,
}

impl<C, S> Supervisor<'_, C, S>
where
    C: AsyncWrite,
    S: AsyncWrite,
{
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ReaderEvent>,
        done: watch::Sender<bool>,
    ) -> (WriteHalf<C>, WriteHalf<S>, Result<(), GuardError>) {
        let outcome = match self.handshake(&mut events).await {
            Ok(()) => {
                // Decisive point reached: release the readers and keep
                // forwarding whatever is still in flight.
                let _ = done.send(true);
                self.drain(&mut events, true).await;
                if self.chain_validated {
                    debug!("handshake drained; certificate chain validated");
                    Ok(())
                } else {
                    Err(GuardError::ChainNotValidated)
                }
            }
            Err(error) => {
                // Join both readers, discarding whatever they still send.
                let _ = done.send(true);
                self.drain(&mut events, false).await;
                Err(error)
            }
        };
        (self.client_wr, self.server_wr, outcome)
    }

    /// Consume reader events until the handshake reaches a decisive point
    /// (`Ok`) or a terminal error surfaces.
    async fn handshake(
        &mut self,
        events: &mut mpsc::Receiver<ReaderEvent>,
    ) -> Result<(), GuardError> {
        loop {
            let Some(event) = events.recv().await else {
                return Err(GuardError::ChainNotValidated);
            };
            match event {
                ReaderEvent::Record(record) => {
                    if self.dispatch(record).await? {
                        return Ok(());
                    }
                }
                ReaderEvent::Partial { origin, data } => {
                    self.write_to(origin.opposite(), &data).await?;
                }
                ReaderEvent::Eos { origin } => {
                    debug!(%origin, "reader stopped before drain");
                    self.done_count += 1;
                }
                ReaderEvent::Failed { origin, error } => {
                    debug!(%origin, "reader failed");
                    self.done_count += 1;
                    return Err(error);
                }
            }
        }
    }

    /// Dispatch one record. Returns `true` when the record closes the
    /// handshake window and the drain phase should begin.
    async fn dispatch(&mut self, record: Record) -> Result<bool, GuardError> {
        let origin = record.origin;
        trace!(
            %origin,
            content_type = record.content_type,
            len = record.data.len(),
            "dispatching record"
        );
        match record.content_type {
            CONTENT_CHANGE_CIPHER_SPEC => {
                if record.data.len() != 6 {
                    return Err(GuardError::BadChangeCipherSpec {
                        reason: "record is not exactly 6 bytes",
                    });
                }
                if record.payload()[0] != 1 {
                    return Err(GuardError::BadChangeCipherSpec {
                        reason: "payload byte is not 0x01",
                    });
                }
                self.write_to(origin.opposite(), &record.data).await?;
                Ok(false)
            }
            CONTENT_ALERT => self.dispatch_alert(record).await,
            CONTENT_APPLICATION_DATA => {
                // Acceptable during the handshake phase; simply relayed.
                self.write_to(origin.opposite(), &record.data).await?;
                Ok(false)
            }
            CONTENT_HANDSHAKE => self.dispatch_handshake(record).await,
            other => Err(GuardError::UnknownContentType(other)),
        }
    }

    async fn dispatch_alert(&mut self, record: Record) -> Result<bool, GuardError> {
        let payload = record.payload();
        if payload.len() < 2 {
            return Err(GuardError::Malformed { what: "alert record" });
        }
        let level = payload[0];
        // The description is carried as a 16-bit quantity when the peer
        // sends three or more payload bytes; standard alerts carry one.
        let description = if payload.len() >= 3 {
            u16::from_be_bytes([payload[1], payload[2]])
        } else {
            u16::from(payload[1])
        };
        debug!(
            origin = %record.origin,
            level,
            description,
            name = alert_description_name(description),
            "alert received"
        );
        if level == ALERT_LEVEL_FATAL {
            return Err(GuardError::FatalAlert { description });
        }
        if description == ALERT_CLOSE_NOTIFY {
            return Err(GuardError::CloseNotify);
        }
        if level != ALERT_LEVEL_WARNING {
            warn!(level, "alert with unknown level");
        }
        self.write_to(record.origin.opposite(), &record.data).await?;
        Ok(false)
    }

    async fn dispatch_handshake(&mut self, record: Record) -> Result<bool, GuardError> {
        match record.origin {
            Origin::Client => self.dispatch_client_handshake(record).await,
            Origin::Server => self.dispatch_server_handshake(record).await,
        }
    }

    async fn dispatch_client_handshake(&mut self, record: Record) -> Result<bool, GuardError> {
        let Some(expected) = self.client_expected else {
            // Everything after the ClientHello passes through untouched.
            self.write_to(Origin::Server, &record.data).await?;
            return Ok(false);
        };

        let (hs_type, body) =
            hello::handshake_body(record.payload(), true, "client hello record")?;
        if hs_type != expected {
            return Err(GuardError::UnexpectedHandshake {
                origin: Origin::Client,
                got: hs_type,
                expected,
            });
        }

        let parsed = hello::parse_client_hello(body)?;
        if !parsed.session_id.is_empty() {
            debug!(
                session_id_len = parsed.session_id.len(),
                "client attempting session resumption; stripping session id"
            );
        }
        match hello::sanitize_client_hello(&record.data, &parsed) {
            Some(rewritten) => self.write_to(Origin::Server, &rewritten).await?,
            None => self.write_to(Origin::Server, &record.data).await?,
        }
        self.client_expected = None;
        Ok(false)
    }

    async fn dispatch_server_handshake(&mut self, record: Record) -> Result<bool, GuardError> {
        let (hs_type, body) =
            hello::handshake_body(record.payload(), false, "server handshake record")?;
        trace!(
            hs_type,
            name = handshake_type_name(hs_type),
            "server handshake message"
        );

        // Types past CertificateStatus are tolerated in any state: logged
        // and forwarded without advancing the machine.
        if hs_type > HS_CERTIFICATE_STATUS {
            warn!(hs_type, "tolerating unrecognized server handshake type");
            self.write_to(Origin::Client, &record.data).await?;
            return Ok(false);
        }

        match self.server_phase {
            ServerPhase::AwaitHello => {
                if hs_type != HS_SERVER_HELLO {
                    return Err(GuardError::UnexpectedHandshake {
                        origin: Origin::Server,
                        got: hs_type,
                        expected: HS_SERVER_HELLO,
                    });
                }
                let parsed = hello::parse_server_hello(body)?;
                if parsed.negotiated_tls13() {
                    return Err(GuardError::Tls13NotSupported);
                }
                self.write_to(Origin::Client, &record.data).await?;
                self.server_phase = ServerPhase::AwaitCertificate;
                Ok(false)
            }
            ServerPhase::AwaitCertificate => match hs_type {
                HS_CERTIFICATE => {
                    // Verify before forwarding: a rejected chain never
                    // reaches the client.
                    let certs = chain::extract_chain(body)?;
                    chain::verify_chain(&certs, self.fqdn, self.roots)?;
                    self.chain_validated = true;
                    self.write_to(Origin::Client, &record.data).await?;
                    Ok(true)
                }
                HS_CERTIFICATE_REQUEST | HS_SERVER_HELLO_DONE => {
                    // The server will not (or will no longer) present a
                    // certificate in the clear.
                    self.write_to(Origin::Client, &record.data).await?;
                    Ok(true)
                }
                HS_HELLO_REQUEST | HS_CERTIFICATE_STATUS => {
                    self.write_to(Origin::Client, &record.data).await?;
                    Ok(self.chain_validated)
                }
                other => Err(GuardError::UnexpectedHandshake {
                    origin: Origin::Server,
                    got: other,
                    expected: HS_CERTIFICATE,
                }),
            },
        }
    }

    /// Forward in-flight records until both readers have acknowledged
    /// termination. With `forward` unset (error teardown) records are
    /// consumed but not written.
    async fn drain(&mut self, events: &mut mpsc::Receiver<ReaderEvent>, forward: bool) {
        while self.done_count < 2 {
            let Some(event) = events.recv().await else {
                break;
            };
            match event {
                ReaderEvent::Record(record) if forward => {
                    if let Err(error) = self
                        .write_to(record.origin.opposite(), &record.data)
                        .await
                    {
                        warn!(%error, "write failed during drain");
                    }
                }
                ReaderEvent::Partial { origin, data } if forward => {
                    if let Err(error) = self.write_to(origin.opposite(), &data).await {
                        warn!(%error, "write failed during drain");
                    }
                }
                ReaderEvent::Eos { origin } => {
                    trace!(%origin, "reader drained");
                    self.done_count += 1;
                }
                ReaderEvent::Failed { origin, error } => {
                    debug!(%origin, %error, "reader ended during drain");
                    self.done_count += 1;
                }
                _ => {}
            }
        }
    }

    async fn write_to(&mut self, dest: Origin, data: &[u8]) -> Result<(), GuardError> {
        trace!(%dest, len = data.len(), "forwarding");
        let result = match dest {
            Origin::Client => async {
                self.client_wr.write_all(data).await?;
                self.client_wr.flush().await
            }
            .await,
            Origin::Server => async {
                self.server_wr.write_all(data).await?;
                self.server_wr.flush().await
            }
            .await,
        };
        result.map_err(|source| GuardError::io(dest, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(2);

    // ============= Wire builders =============

    fn wrap_record(content_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut record = vec![
            content_type,
            0x03,
            0x01,
            (payload.len() >> 8) as u8,
            payload.len() as u8,
        ];
        record.extend_from_slice(payload);
        record
    }

    fn wrap_handshake(hs_type: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![hs_type];
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        payload.extend_from_slice(body);
        wrap_record(CONTENT_HANDSHAKE, &payload)
    }

    fn client_hello_body(session_id: &[u8], extensions: Option<&[u8]>) -> Vec<u8> {
        let suites: &[u8] = &[0xc0, 0x2f, 0x00, 0x35];
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0x5a; 32]);
        body.push(session_id.len() as u8);
        body.extend_from_slice(session_id);
        body.extend_from_slice(&(suites.len() as u16).to_be_bytes());
        body.extend_from_slice(suites);
        body.push(1);
        body.push(0);
        if let Some(ext) = extensions {
            body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            body.extend_from_slice(ext);
        }
        body
    }

    fn server_hello_body() -> Vec<u8> {
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0xa5; 32]);
        body.push(0);
        body.extend_from_slice(&[0xc0, 0x2f]);
        body.push(0);
        body
    }

    /// server_name extension block for `secret.example`, padded to `total`.
    fn sni_extensions(total: usize) -> Vec<u8> {
        let host = b"secret.example";
        let mut sni = Vec::new();
        sni.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
        sni.push(0);
        sni.extend_from_slice(&(host.len() as u16).to_be_bytes());
        sni.extend_from_slice(host);

        let mut block = Vec::new();
        block.extend_from_slice(&0u16.to_be_bytes());
        block.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        block.extend_from_slice(&sni);
        let pad = total.checked_sub(block.len() + 4).unwrap();
        block.extend_from_slice(&0xffffu16.to_be_bytes());
        block.extend_from_slice(&(pad as u16).to_be_bytes());
        block.extend_from_slice(&vec![0u8; pad]);
        block
    }

    fn certificate_body(certs: &[&[u8]]) -> Vec<u8> {
        let mut entries = Vec::new();
        for cert in certs {
            entries.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]);
            entries.extend_from_slice(cert);
        }
        let mut body = Vec::new();
        body.extend_from_slice(&(entries.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(&entries);
        body
    }

    fn make_chain(host: &str) -> (TrustAnchor<'static>, Vec<u8>, Vec<u8>) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf_params = CertificateParams::new(vec![host.to_string()]).unwrap();
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let anchor = webpki::anchor_from_trusted_cert(ca_cert.der())
            .unwrap()
            .to_owned();
        (
            anchor,
            leaf_cert.der().as_ref().to_vec(),
            ca_cert.der().as_ref().to_vec(),
        )
    }

    // ============= Harness =============

    /// Guard task plus the two application-side stream ends.
    fn start_guard(
        anchor: TrustAnchor<'static>,
        fqdn: &str,
    ) -> (
        DuplexStream,
        DuplexStream,
        tokio::task::JoinHandle<Result<(), GuardError>>,
    ) {
        let (client_app, guard_client) = duplex(65536);
        let (guard_server, server_app) = duplex(65536);
        let fqdn = fqdn.to_string();
        let handle = tokio::spawn(async move {
            let config = GuardConfig {
                read_timeout: TIMEOUT,
                roots: vec![anchor],
            };
            Guard::new(config)
                .run(guard_client, guard_server, &fqdn)
                .await
                .map(drop)
        });
        (client_app, server_app, handle)
    }

    async fn read_n(stream: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    // ============= End-to-end scenarios =============

    #[tokio::test]
    async fn test_happy_path_delivers_everything_unmodified() {
        let (anchor, leaf, ca) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        assert_eq!(read_n(&mut server, ch.len()).await, ch);

        let sh = wrap_handshake(HS_SERVER_HELLO, &server_hello_body());
        let cert = wrap_handshake(HS_CERTIFICATE, &certificate_body(&[&leaf, &ca]));
        let shd = wrap_handshake(HS_SERVER_HELLO_DONE, &[]);
        server.write_all(&sh).await.unwrap();
        server.write_all(&cert).await.unwrap();
        server.write_all(&shd).await.unwrap();

        let expected = [sh, cert, shd].concat();
        assert_eq!(read_n(&mut client, expected.len()).await, expected);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_resumption_attempt_is_stripped() {
        let (anchor, leaf, ca) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[0x11; 32], None));
        // What the server must see: the same hello with an empty session id.
        let expected = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        assert_eq!(expected.len(), ch.len() - 32);

        client.write_all(&ch).await.unwrap();
        assert_eq!(read_n(&mut server, expected.len()).await, expected);

        server
            .write_all(&wrap_handshake(HS_SERVER_HELLO, &server_hello_body()))
            .await
            .unwrap();
        server
            .write_all(&wrap_handshake(
                HS_CERTIFICATE,
                &certificate_body(&[&leaf, &ca]),
            ))
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sni_is_elided() {
        let (anchor, leaf, ca) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(
            HS_CLIENT_HELLO,
            &client_hello_body(&[], Some(&sni_extensions(40))),
        );
        // Extensions block elided down to an empty vector.
        let expected = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], Some(&[])));
        assert_eq!(expected.len(), ch.len() - 40);

        client.write_all(&ch).await.unwrap();
        let got = read_n(&mut server, expected.len()).await;
        assert_eq!(got, expected);
        assert_eq!(&got[got.len() - 2..], &[0, 0]);

        server
            .write_all(&wrap_handshake(HS_SERVER_HELLO, &server_hello_body()))
            .await
            .unwrap();
        server
            .write_all(&wrap_handshake(
                HS_CERTIFICATE,
                &certificate_body(&[&leaf, &ca]),
            ))
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hostname_mismatch_rejected_and_cert_withheld() {
        let (anchor, leaf, ca) = make_chain("other.example");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        let sh = wrap_handshake(HS_SERVER_HELLO, &server_hello_body());
        server.write_all(&sh).await.unwrap();
        server
            .write_all(&wrap_handshake(
                HS_CERTIFICATE,
                &certificate_body(&[&leaf, &ca]),
            ))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::CertificateRejected(_))
        ));

        // The client got the ServerHello and nothing after it.
        assert_eq!(read_n(&mut client, sh.len()).await, sh);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_alert_terminates_without_forwarding() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        let sh = wrap_handshake(HS_SERVER_HELLO, &server_hello_body());
        server.write_all(&sh).await.unwrap();
        // handshake_failure(40), fatal.
        server
            .write_all(&wrap_record(CONTENT_ALERT, &[ALERT_LEVEL_FATAL, 40]))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::FatalAlert { description: 40 })
        ));

        assert_eq!(read_n(&mut client, sh.len()).await, sh);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_close_notify_terminates() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, _server, handle) = start_guard(anchor, "example.com");

        client
            .write_all(&wrap_record(
                CONTENT_ALERT,
                &[ALERT_LEVEL_WARNING, ALERT_CLOSE_NOTIFY as u8],
            ))
            .await
            .unwrap();

        assert!(matches!(handle.await.unwrap(), Err(GuardError::CloseNotify)));
    }

    #[tokio::test]
    async fn test_oversize_record_is_a_framing_error() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        // Length field 16385.
        server
            .write_all(&[CONTENT_HANDSHAKE, 0x03, 0x03, 0x40, 0x01])
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::Oversize { len: 16385, .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_change_cipher_spec_rejected() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, _server, handle) = start_guard(anchor, "example.com");

        client
            .write_all(&wrap_record(CONTENT_CHANGE_CIPHER_SPEC, &[2]))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::BadChangeCipherSpec { .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_client_handshake_rejected() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, _server, handle) = start_guard(anchor, "example.com");

        // The client leads with a ServerHello.
        client
            .write_all(&wrap_handshake(HS_SERVER_HELLO, &server_hello_body()))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::UnexpectedHandshake {
                origin: Origin::Client,
                got: HS_SERVER_HELLO,
                expected: HS_CLIENT_HELLO,
            })
        ));
    }

    #[tokio::test]
    async fn test_server_done_without_certificate_fails_validation() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        server
            .write_all(&wrap_handshake(HS_SERVER_HELLO, &server_hello_body()))
            .await
            .unwrap();
        server
            .write_all(&wrap_handshake(HS_SERVER_HELLO_DONE, &[]))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::ChainNotValidated)
        ));
    }

    #[tokio::test]
    async fn test_tls13_selection_fails_closed() {
        let (anchor, _, _) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        // ServerHello whose supported_versions selects 0x0304.
        let mut body = server_hello_body();
        let ext: &[u8] = &[0x00, 0x2b, 0x00, 0x02, 0x03, 0x04];
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(ext);
        server
            .write_all(&wrap_handshake(HS_SERVER_HELLO, &body))
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(GuardError::Tls13NotSupported)
        ));
    }

    #[tokio::test]
    async fn test_application_data_relayed_during_drain() {
        let (anchor, leaf, ca) = make_chain("example.com");
        let (mut client, mut server, handle) = start_guard(anchor, "example.com");

        let ch = wrap_handshake(HS_CLIENT_HELLO, &client_hello_body(&[], None));
        client.write_all(&ch).await.unwrap();
        read_n(&mut server, ch.len()).await;

        let sh = wrap_handshake(HS_SERVER_HELLO, &server_hello_body());
        let cert = wrap_handshake(HS_CERTIFICATE, &certificate_body(&[&leaf, &ca]));
        let app = wrap_record(CONTENT_APPLICATION_DATA, &[0xde, 0xad, 0xbe, 0xef]);
        server.write_all(&sh).await.unwrap();
        server.write_all(&cert).await.unwrap();
        server.write_all(&app).await.unwrap();

        let expected = [sh, cert, app].concat();
        assert_eq!(read_n(&mut client, expected.len()).await, expected);

        handle.await.unwrap().unwrap();
    }
}
