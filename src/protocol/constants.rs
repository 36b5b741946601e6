//! TLS record-layer and handshake-layer wire constants (RFC 5246).

/// TLS record header size: type (1) + version (2) + length (2).
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext record payload (RFC 5246 §6.2.1).
pub const MAX_PLAINTEXT_LEN: usize = 16384;

/// Minimum protocol version accepted in record headers: 3.1 (TLS 1.0).
pub const MIN_VERSION_MAJOR: u8 = 3;
pub const MIN_VERSION_MINOR: u8 = 1;

// Record content types.
pub const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;
pub const CONTENT_APPLICATION_DATA: u8 = 23;

// Handshake message types.
pub const HS_HELLO_REQUEST: u8 = 0;
pub const HS_CLIENT_HELLO: u8 = 1;
pub const HS_SERVER_HELLO: u8 = 2;
pub const HS_CERTIFICATE: u8 = 11;
pub const HS_CERTIFICATE_REQUEST: u8 = 13;
pub const HS_SERVER_HELLO_DONE: u8 = 14;
pub const HS_CERTIFICATE_STATUS: u8 = 22;

// Alert levels.
pub const ALERT_LEVEL_WARNING: u8 = 1;
pub const ALERT_LEVEL_FATAL: u8 = 2;

// Alert descriptions.
pub const ALERT_CLOSE_NOTIFY: u16 = 0;

// Extension types that show up in hello traces.
pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;

/// ServerHello supported_versions value that selects TLS 1.3.
pub const TLS13_VERSION: u16 = 0x0304;

/// Registry name of a cipher suite, for hello traces.
pub fn cipher_suite_name(suite: u16) -> &'static str {
    match suite {
        0x0000 => "TLS_NULL_WITH_NULL_NULL",
        0x000a => "TLS_RSA_WITH_3DES_EDE_CBC_SHA",
        0x002f => "TLS_RSA_WITH_AES_128_CBC_SHA",
        0x0030 => "TLS_DH_DSS_WITH_AES_128_CBC_SHA",
        0x0033 => "TLS_DHE_RSA_WITH_AES_128_CBC_SHA",
        0x0035 => "TLS_RSA_WITH_AES_256_CBC_SHA",
        0x0039 => "TLS_DHE_RSA_WITH_AES_256_CBC_SHA",
        0xc009 => "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
        0xc00a => "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
        0xc013 => "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
        0xc014 => "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
        0xc02b => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        0xc02c => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        0xc02f => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        0xc030 => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        0xcca8 => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        0xcca9 => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        _ => "UNKNOWN",
    }
}

/// Registry name of an alert description, for alert traces and errors.
pub fn alert_description_name(desc: u16) -> &'static str {
    match desc {
        0 => "close_notify",
        10 => "unexpected_message",
        20 => "bad_record_mac",
        21 => "decryption_failed",
        22 => "record_overflow",
        30 => "decompression_failure",
        40 => "handshake_failure",
        41 => "no_certificate",
        42 => "bad_certificate",
        43 => "unsupported_certificate",
        44 => "certificate_revoked",
        45 => "certificate_expired",
        46 => "certificate_unknown",
        47 => "illegal_parameter",
        48 => "unknown_ca",
        49 => "access_denied",
        50 => "decode_error",
        51 => "decrypt_error",
        60 => "export_restriction",
        70 => "protocol_version",
        71 => "insufficient_security",
        80 => "internal_error",
        86 => "inappropriate_fallback",
        90 => "user_canceled",
        100 => "no_renegotiation",
        110 => "unsupported_extension",
        _ => "unknown",
    }
}

/// Human name of a handshake message type, for traces.
pub fn handshake_type_name(hs_type: u8) -> &'static str {
    match hs_type {
        HS_HELLO_REQUEST => "HelloRequest",
        HS_CLIENT_HELLO => "ClientHello",
        HS_SERVER_HELLO => "ServerHello",
        HS_CERTIFICATE => "Certificate",
        HS_CERTIFICATE_REQUEST => "CertificateRequest",
        HS_SERVER_HELLO_DONE => "ServerHelloDone",
        HS_CERTIFICATE_STATUS => "CertificateStatus",
        _ => "unknown",
    }
}
