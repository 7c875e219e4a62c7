//! TLS acceptor construction for the HTTPS listener.
//!
//! The certificate presented on the TLS port is a localhost certificate
//! bundled into the binary. Hosts that provision their own pair can point
//! `TLS_CERT_PATH` / `TLS_KEY_PATH` at PEM files instead.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// PEM certificate for `localhost` / `127.0.0.1` shipped with the service.
pub const EMBEDDED_CERT_PEM: &[u8] = include_bytes!("../../certs/localhost.crt");

/// PEM (PKCS#8) private key matching [`EMBEDDED_CERT_PEM`].
pub const EMBEDDED_KEY_PEM: &[u8] = include_bytes!("../../certs/localhost.key");

/// Builds TLS sessions for connections accepted on the HTTPS listener.
///
/// Cheap to clone: every clone shares the same [`ServerConfig`].
#[derive(Clone)]
pub struct TlsFactory {
    acceptor: TlsAcceptor,
}

impl TlsFactory {
    /// Factory presenting the bundled localhost certificate.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bundled material is corrupt.
    pub fn embedded() -> Result<Self> {
        Self::from_pem(EMBEDDED_CERT_PEM, EMBEDDED_KEY_PEM)
    }

    /// Factory built from PEM files on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_files(cert_path: &str, key_path: &str) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path)
            .with_context(|| format!("failed to read TLS certificate {cert_path}"))?;
        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("failed to read TLS private key {key_path}"))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Factory built from PEM-encoded certificate chain and private key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key cannot be parsed, or if
    /// rustls rejects the pair.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let config = build_server_config(cert_pem, key_pem)?;
        Ok(Self {
            acceptor: TlsAcceptor::from(config),
        })
    }

    /// Acceptor used to run the server side of each handshake.
    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

impl std::fmt::Debug for TlsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TlsFactory { .. }")
    }
}

/// Build a [`rustls::ServerConfig`] from PEM-encoded certificate and private key bytes.
fn build_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse TLS certificate chain")?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in PEM data");
    }

    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_pem))
        .context("failed to read TLS private key")?
        .context("no private key found in PEM data")?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("failed to select TLS protocol versions")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("failed to build rustls ServerConfig")?;

    Ok(Arc::new(config))
}

/// Log what the handshake negotiated. Diagnostic only; nothing is enforced.
pub(crate) fn log_session<IO>(stream: &TlsStream<IO>) {
    let (_, session) = stream.get_ref();
    debug!(
        protocol = ?session.protocol_version(),
        cipher_suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
        "TLS session established"
    );
}
