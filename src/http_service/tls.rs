//! TLS bootstrap: a configured key pair, a generated self-signed
//! certificate, or HTTP-only with a startup warning. Per `spec.md` §4.3(i).

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// How the HTTP service should terminate TLS, if at all.
pub enum TlsMode {
    /// Serve plain HTTP/1.1 only. HTTP/2 requires ALPN over TLS.
    None,
    /// PEM-encoded certificate chain and private key, as configured by an
    /// operator.
    Configured { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    /// Generate a self-signed certificate for the given hostnames. Useful
    /// for local development; browsers and strict clients will not trust it.
    SelfSigned { hostnames: Vec<String> },
}

/// Builds a `TlsAcceptor` for every mode except `None`, which yields `Ok(None)`
/// and leaves it to the caller to log the "HTTP/2 disabled" warning.
pub fn build_acceptor(mode: &TlsMode) -> Result<Option<TlsAcceptor>> {
    let server_config = match mode {
        TlsMode::None => return Ok(None),
        TlsMode::Configured { cert_pem, key_pem } => {
            let certs = parse_certs(cert_pem)?;
            let key = parse_key(key_pem)?;
            build_server_config(certs, key)?
        }
        TlsMode::SelfSigned { hostnames } => {
            let generated = rcgen::generate_simple_self_signed(hostnames.clone())
                .map_err(|err| Error::configuration(format!("self-signed certificate generation failed: {err}")))?;
            let cert_der = CertificateDer::from(generated.cert.der().to_vec());
            let key_der = PrivateKeyDer::try_from(generated.signing_key.serialize_der())
                .map_err(|err| Error::configuration(format!("self-signed key encoding failed: {err}")))?;
            build_server_config(vec![cert_der], key_der)?
        }
    };
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn build_server_config(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::configuration(format!("invalid TLS certificate/key pair: {err}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| Error::configuration(format!("invalid certificate PEM: {err}")))
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut std::io::Cursor::new(pem))
        .map_err(|err| Error::configuration(format!("invalid key PEM: {err}")))?
        .ok_or_else(|| Error::configuration("no private key found in PEM input"))
}
