//! Server Certificate message decoding and X.509 chain verification.
//!
//! The Certificate handshake message carries a 24-bit chain length followed
//! by `{24-bit length, DER certificate}` entries. The first entry is the
//! leaf; the rest feed the intermediates pool for path building.

use rustls_pki_types::{CertificateDer, ServerName, TrustAnchor, UnixTime};
use tracing::debug;
use webpki::{EndEntityCert, KeyUsage};

use crate::error::GuardError;

/// Decode the certificate list out of a Certificate message body (the
/// bytes after the 4-byte handshake header). Entries are borrowed.
pub(crate) fn extract_chain(body: &[u8]) -> Result<Vec<CertificateDer<'_>>, GuardError> {
    if body.len() < 3 {
        return Err(GuardError::BadCertificateMessage {
            reason: "missing chain length",
        });
    }
    let chain_len = u32::from_be_bytes([0, body[0], body[1], body[2]]) as usize;
    let mut pos = &body[3..];
    if pos.len() < chain_len {
        return Err(GuardError::BadCertificateMessage {
            reason: "chain length overruns message",
        });
    }
    pos = &pos[..chain_len];

    let mut chain = Vec::new();
    while !pos.is_empty() {
        if pos.len() < 3 {
            return Err(GuardError::BadCertificateMessage {
                reason: "truncated certificate entry",
            });
        }
        let cert_len = u32::from_be_bytes([0, pos[0], pos[1], pos[2]]) as usize;
        if pos.len() < 3 + cert_len {
            return Err(GuardError::BadCertificateMessage {
                reason: "certificate entry overruns chain",
            });
        }
        chain.push(CertificateDer::from(&pos[3..3 + cert_len]));
        pos = &pos[3 + cert_len..];
    }

    if chain.is_empty() {
        return Err(GuardError::BadCertificateMessage {
            reason: "empty certificate chain",
        });
    }
    Ok(chain)
}

/// Verify the chain: path-build from the leaf through the supplied
/// intermediates to one of `roots`, then (when `fqdn` is nonempty) match
/// the leaf against the DNS name.
pub(crate) fn verify_chain(
    chain: &[CertificateDer<'_>],
    fqdn: &str,
    roots: &[TrustAnchor<'static>],
) -> Result<(), GuardError> {
    let Some((leaf, intermediates)) = chain.split_first() else {
        return Err(GuardError::BadCertificateMessage {
            reason: "empty certificate chain",
        });
    };
    debug!(
        chain_len = chain.len(),
        fqdn,
        "verifying server certificate chain"
    );

    let end_entity = EndEntityCert::try_from(leaf)?;
    end_entity.verify_for_usage(
        webpki::ALL_VERIFICATION_ALGS,
        roots,
        intermediates,
        UnixTime::now(),
        KeyUsage::server_auth(),
        None,
        None,
    )?;

    if !fqdn.is_empty() {
        let name = ServerName::try_from(fqdn).map_err(|_| GuardError::BadDnsName)?;
        end_entity.verify_is_valid_for_subject_name(&name)?;
    }

    debug!(fqdn, "certificate chain validated");
    Ok(())
}
