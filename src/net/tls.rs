//! TLS adapter: a handshake state machine driven by the I/O loop.
//!
//! Implemented on `rustls::ServerConnection`'s raw non-blocking API
//! (`read_tls`/`write_tls`/`process_new_packets`, `wants_read`/
//! `wants_write`), the idiomatic analogue of the original adapter's
//! want-read/want-write → interest-mask translation — grounded on
//! `original_source/src/network/openssl.c`'s `ssl_state` enum and its
//! separate `ssl_read_events`/`ssl_write_events` tracking.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::sync::Arc;

use mio::Interest;
use rustls::server::ServerConnection;
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// ALPN protocol the hub's TLS listener advertises; no other value is ever
/// accepted.
pub const ALPN_ADC: &[u8] = b"adc";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificate chain: {0}")]
    CertLoad(String),
    #[error("failed to load private key: {0}")]
    KeyLoad(String),
    #[error("tls configuration rejected: {0}")]
    Config(#[from] rustls::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Handshake/connection state, matching the original's `ssl_state` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    None,
    Accepting,
    Connecting,
    Connected,
    Error,
    Disconnecting,
}

/// Builds a `rustls::ServerConfig` from PEM cert chain and key files,
/// advertising ALPN `"adc"` and the configured minimum protocol version.
pub fn build_server_config(cert_file: &str, key_file: &str, min_tls12: bool) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_chain = load_cert_chain(cert_file)?;
    let key = load_private_key(key_file)?;

    let versions: &[&rustls::SupportedProtocolVersion] = if min_tls12 {
        &[&rustls::version::TLS12, &rustls::version::TLS13]
    } else {
        &[&rustls::version::TLS13]
    };

    let mut config = ServerConfig::builder_with_protocol_versions(versions)
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    config.alpn_protocols = vec![ALPN_ADC.to_vec()];
    Ok(Arc::new(config))
}

fn load_cert_chain(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::CertLoad(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertLoad(e.to_string()))
}

fn load_private_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::KeyLoad(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::KeyLoad(e.to_string()))?
        .ok_or_else(|| TlsError::KeyLoad(format!("no private key found in {path}")))
}

/// Wraps one accepted connection with a server-side TLS handshake state
/// machine. `read_events`/`write_events` are tracked separately from the
/// consumer's own interest and unioned into the final mask the I/O loop
/// registers for this connection.
pub struct TlsAdapter {
    state: TlsState,
    conn: ServerConnection,
    read_events: bool,
    write_events: bool,
}

impl TlsAdapter {
    pub fn new_server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(TlsAdapter {
            state: TlsState::Accepting,
            conn,
            read_events: true,
            write_events: false,
        })
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    /// Reads ciphertext off the socket into rustls' internal buffer.
    pub fn read_tls(&mut self, socket: &mut impl Read) -> io::Result<usize> {
        match self.conn.read_tls(socket) {
            Ok(0) => {
                self.state = TlsState::Disconnecting;
                Ok(0)
            },
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.state = TlsState::Error;
                Err(e)
            },
        }
    }

    /// Writes pending ciphertext to the socket.
    pub fn write_tls(&mut self, socket: &mut impl Write) -> io::Result<usize> {
        match self.conn.write_tls(socket) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.state = TlsState::Error;
                Err(e)
            },
        }
    }

    /// Processes newly read TLS records, advancing the handshake. Must be
    /// called after every successful `read_tls`.
    pub fn process_new_packets(&mut self) -> Result<(), TlsError> {
        match self.conn.process_new_packets() {
            Ok(_) => {
                if !self.conn.is_handshaking() && self.state == TlsState::Accepting {
                    self.state = TlsState::Connected;
                }
                self.sync_interest();
                Ok(())
            },
            Err(e) => {
                self.state = TlsState::Error;
                Err(TlsError::Config(e))
            },
        }
    }

    /// Feeds bytes the probe already consumed from the socket (the
    /// ClientHello prefix peeked for classification) into rustls' TLS
    /// record buffer, as if they had just been read from the wire.
    pub fn feed_peeked(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.conn.read_tls(&mut io::Cursor::new(bytes))
    }

    fn sync_interest(&mut self) {
        self.read_events = self.conn.wants_read();
        self.write_events = self.conn.wants_write();
    }

    /// Plaintext read of application data, once `state() ==
    /// TlsState::Connected`.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state == TlsState::Error {
            return Err(io::Error::new(io::ErrorKind::Other, "tls connection in error state"));
        }
        let n = self.conn.reader().read(buf)?;
        self.sync_interest();
        Ok(n)
    }

    /// Plaintext write of application data.
    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state == TlsState::Error {
            return Err(io::Error::new(io::ErrorKind::Other, "tls connection in error state"));
        }
        let n = self.conn.writer().write(buf)?;
        self.sync_interest();
        Ok(n)
    }

    pub fn wants_read(&self) -> bool {
        self.read_events
    }

    pub fn wants_write(&self) -> bool {
        self.write_events
    }

    /// Unions the adapter's own read/write interest with the consumer's,
    /// for reprogramming the I/O loop's registration.
    pub fn interest_union(&self, consumer: Interest) -> Interest {
        let mut interest = consumer;
        if self.read_events {
            interest = interest.add(Interest::READABLE);
        }
        if self.write_events {
            interest = interest.add(Interest::WRITABLE);
        }
        interest
    }

    /// The negotiated ALPN protocol, if any.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }
}

/// SHA-256 fingerprint of the hub's own leaf certificate, computed once at
/// startup from the same PEM file handed to [`build_server_config`] and
/// logged alongside the listening address.
pub fn certificate_fingerprint(cert_file: &str) -> Result<String, TlsError> {
    let chain = load_cert_chain(cert_file)?;
    let leaf = chain
        .first()
        .ok_or_else(|| TlsError::CertLoad(format!("no certificate found in {cert_file}")))?;
    Ok(sha256_base32(leaf.as_ref()))
}

fn sha256_base32(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    crate::identity::sid::base32_encode_bytes(&digest)
}

/// Formats a fingerprint URI as logged alongside the listening address.
pub fn fingerprint_uri(host: &str, port: u16, fingerprint: &str) -> String {
    format!("adcs://{host}:{port}/?kp=SHA256/{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_encodes_known_digest() {
        let digest = Sha256::digest(b"");
        let text = crate::identity::sid::base32_encode_bytes(&digest);
        assert!(!text.is_empty());
        assert!(text.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn fingerprint_uri_format() {
        let uri = fingerprint_uri("example.org", 1511, "ABCD");
        assert_eq!(uri, "adcs://example.org:1511/?kp=SHA256/ABCD");
    }
}
