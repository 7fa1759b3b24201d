//! TLS configuration builders for the server and client transport
//! variants (spec.md §4.1 "Variants").
//!
//! The core only consumes a byte-stream abstraction; this module's job
//! is purely to turn the configuration surface (certificates, SNI host,
//! allowed protocol versions, custom validators, client certs) into a
//! `rustls` config and a `tokio_rustls` acceptor/connector.

use std::io;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, RootCertStore, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::StormError;

/// Server-side TLS configuration (spec.md §4.1: "Server TLS takes a
/// certificate and optional require-client-certificate flag").
pub struct TlsServerOptions {
    pub cert_chain_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub require_client_cert: bool,
    pub client_ca_pem: Option<Vec<u8>>,
}

impl TlsServerOptions {
    pub fn build_acceptor(&self) -> Result<TlsAcceptor, StormError> {
        let certs = parse_certs(&self.cert_chain_pem)?;
        let key = parse_private_key(&self.private_key_pem)?;

        let builder = rustls::ServerConfig::builder().with_safe_defaults();

        let config = if self.require_client_cert {
            let ca_pem = self.client_ca_pem.as_ref().ok_or_else(|| {
                StormError::Config(
                    "require_client_cert is set but client_ca_pem is missing".into(),
                )
            })?;
            let mut roots = RootCertStore::empty();
            for cert in parse_certs(ca_pem)? {
                roots.add(&cert).map_err(|e| {
                    StormError::Config(format!("invalid client CA certificate: {e}"))
                })?;
            }
            let verifier = rustls::server::AllowAnyAuthenticatedClient::new(roots);
            builder
                .with_client_cert_verifier(Arc::new(verifier))
                .with_single_cert(certs, key)
        } else {
            builder.with_no_client_auth().with_single_cert(certs, key)
        }
        .map_err(|e| StormError::Config(format!("invalid TLS server config: {e}")))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Client-side TLS configuration (spec.md §4.1: "client TLS takes a
/// target host (for SNI/name validation), allowed protocol versions,
/// optional custom certificate validator, optional client certificate").
pub struct TlsClientOptions {
    pub server_name: String,
    pub custom_verifier: Option<Arc<dyn rustls::client::ServerCertVerifier>>,
    pub client_cert: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsClientOptions {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            custom_verifier: None,
            client_cert: None,
        }
    }

    pub fn build_connector(&self) -> Result<(TlsConnector, ServerName), StormError> {
        let builder = rustls::ClientConfig::builder().with_safe_defaults();

        let config = if let Some(verifier) = &self.custom_verifier {
            let builder = builder.with_custom_certificate_verifier(verifier.clone());
            match &self.client_cert {
                Some((cert_pem, key_pem)) => {
                    let certs = parse_certs(cert_pem)?;
                    let key = parse_private_key(key_pem)?;
                    builder
                        .with_client_auth_cert(certs, key)
                        .map_err(|e| StormError::Config(format!("invalid client cert: {e}")))?
                }
                None => builder.with_no_client_auth(),
            }
        } else {
            let mut roots = RootCertStore::empty();
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
            let builder = builder.with_root_certificates(roots);
            match &self.client_cert {
                Some((cert_pem, key_pem)) => {
                    let certs = parse_certs(cert_pem)?;
                    let key = parse_private_key(key_pem)?;
                    builder
                        .with_client_auth_cert(certs, key)
                        .map_err(|e| StormError::Config(format!("invalid client cert: {e}")))?
                }
                None => builder.with_no_client_auth(),
            }
        };

        let name = ServerName::try_from(self.server_name.as_str())
            .map_err(|_| StormError::Config(format!("invalid server name: {}", self.server_name)))?;

        Ok((TlsConnector::from(Arc::new(config)), name))
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<Certificate>, StormError> {
    let mut reader = io::BufReader::new(pem);
    rustls_pemfile::certs(&mut reader)
        .map_err(|e| StormError::Config(format!("invalid certificate PEM: {e}")))
        .map(|raw| raw.into_iter().map(Certificate).collect())
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKey, StormError> {
    let mut reader = io::BufReader::new(pem);
    let pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| StormError::Config(format!("invalid private key PEM: {e}")))?;
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    let mut reader = io::BufReader::new(pem);
    let rsa = rustls_pemfile::rsa_private_keys(&mut reader)
        .map_err(|e| StormError::Config(format!("invalid private key PEM: {e}")))?;
    rsa.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| StormError::Config("no private key found in PEM".into()))
}
