//! TLS termination for a listener.
//!
//! A [`TlsConfig`] is an opaque, pre-built `rustls` server configuration. Attaching one to
//! a [`crate::ServerBuilder`] makes [`crate::server::server_impl::Server`] wrap every
//! accepted socket in a [`tokio_rustls::server::TlsStream`] before handing it to the
//! connection pipeline; the handshake runs off the accept path (inside the per-connection
//! worker task), so a client stalling mid-handshake can't block other connections from
//! being accepted.

use std::{io, sync::Arc};

use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

/// Pre-parsed TLS server configuration, ready to hand to [`crate::ServerBuilder::tls`].
#[derive(Clone)]
pub struct TlsConfig {
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Builds a [`TlsConfig`] from a PEM-encoded certificate chain and private key.
    ///
    /// `cert_pem` and `key_pem` are the full file contents, not paths — callers read the
    /// files themselves so the error path (missing file, permission denied) stays in
    /// ordinary `std::io` rather than being folded into this type's error type.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsConfigError> {
        let chain = certs(&mut io::Cursor::new(cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TlsConfigError::Pem)?;
        if chain.is_empty() {
            return Err(TlsConfigError::NoCertificate);
        }

        let key = private_key(&mut io::Cursor::new(key_pem))
            .map_err(TlsConfigError::Pem)?
            .ok_or(TlsConfigError::NoPrivateKey)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(TlsConfigError::Rustls)?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

/// Errors building a [`TlsConfig`].
#[derive(Debug)]
pub enum TlsConfigError {
    /// The PEM document couldn't be parsed (malformed base64/DER framing).
    Pem(io::Error),
    /// The certificate PEM contained no certificates.
    NoCertificate,
    /// The key PEM contained no recognizable private key (PKCS#1, PKCS#8, or SEC1).
    NoPrivateKey,
    /// `rustls` rejected the certificate/key pair (mismatched key, unsupported algorithm).
    Rustls(rustls::Error),
}

impl std::fmt::Display for TlsConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsConfigError::Pem(e) => write!(f, "invalid PEM document: {e}"),
            TlsConfigError::NoCertificate => write!(f, "certificate PEM had no certificates"),
            TlsConfigError::NoPrivateKey => write!(f, "key PEM had no private key"),
            TlsConfigError::Rustls(e) => write!(f, "rustls rejected cert/key pair: {e}"),
        }
    }
}

impl std::error::Error for TlsConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cert_pem_is_rejected() {
        let err = TlsConfig::from_pem(b"", b"").unwrap_err();
        assert!(matches!(err, TlsConfigError::NoCertificate));
    }
}
