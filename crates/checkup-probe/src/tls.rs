//! TLS client setup for the tcp and http probes.
//!
//! Server certificates are checked against the Mozilla roots, or against
//! the certificates of a PEM CA file when one is configured. Skipping
//! verification still checks handshake signatures.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

/// Build the client configuration for one probe.
pub(crate) fn client_config(skip_verify: bool, ca_file: &str) -> Result<Arc<ClientConfig>, String> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("tls protocol version error: {e}"))?;

    let config = if skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification { algorithms }))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store(ca_file)?)
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

fn root_store(ca_file: &str) -> Result<RootCertStore, String> {
    let mut roots = RootCertStore::empty();
    if ca_file.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    }

    let file = File::open(ca_file).map_err(|e| format!("reading tls_ca_file {ca_file:?}: {e}"))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("parsing tls_ca_file {ca_file:?}: {e}"))?;
    if certs.is_empty() {
        return Err(format!("tls_ca_file {ca_file:?} holds no certificates"));
    }
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| format!("tls_ca_file {ca_file:?}: {e}"))?;
    }
    Ok(roots)
}

/// The host part of `host:port`, without IPv6 brackets.
pub(crate) fn server_host(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Run the client handshake over an established connection.
pub(crate) async fn connect(
    config: Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, String> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| format!("invalid tls server name {host:?}: {e}"))?;
    TlsConnector::from(config)
        .connect(name, stream)
        .await
        .map_err(|e| format!("tls handshake with {host}: {e}"))
}

/// Accepts any server certificate.
#[derive(Debug)]
struct SkipVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_host_strips_port_and_brackets() {
        assert_eq!(server_host("example.test:443"), "example.test");
        assert_eq!(server_host("127.0.0.1:8443"), "127.0.0.1");
        assert_eq!(server_host("[::1]:8443"), "::1");
        assert_eq!(server_host("example.test"), "example.test");
    }

    #[test]
    fn ca_file_must_hold_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not a certificate\n").unwrap();

        let err = client_config(false, &empty.to_string_lossy()).unwrap_err();
        assert!(err.contains("no certificates"), "{err}");

        let missing = dir.path().join("missing.pem");
        let err = client_config(false, &missing.to_string_lossy()).unwrap_err();
        assert!(err.contains("reading tls_ca_file"), "{err}");
    }

    #[test]
    fn ca_file_is_ignored_when_skipping_verification() {
        assert!(client_config(true, "/nonexistent/ca.pem").is_ok());
        assert!(client_config(false, "").is_ok());
    }

    #[tokio::test]
    async fn handshake_trusts_only_the_configured_ca() {
        let pki = test_pki::generate();
        assert!(pki.ca_pem.contains("BEGIN CERTIFICATE"));
        let addr = test_pki::serve(&pki, "").await;

        let trusted = client_config(false, &pki.ca_file).unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        connect(trusted, "127.0.0.1", stream).await.unwrap();

        let public_roots = client_config(false, "").unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        assert!(connect(public_roots, "127.0.0.1", stream).await.is_err());

        let skipping = client_config(true, "").unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        connect(skipping, "127.0.0.1", stream).await.unwrap();
    }
}
