//! TLS provisioning for the QUIC transport. Grounded in `lib/quic/tls.go`:
//! the server self-signs an ephemeral certificate at startup
//! (`GenerateTLSConfig`) and the client skips certificate verification
//! entirely (`TlsClientConfig{InsecureSkipVerify: true}`) — both are
//! development-only, called out as such in spec.md §9.

use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::CoreResult;

pub const ALPN_KING_IP: &[u8] = b"king-ip";

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Installs the process-wide default `rustls` crypto provider. Idempotent;
/// every endpoint constructor calls this before touching `rustls` types.
pub fn ensure_crypto_provider() {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn self_signed_cert() -> CoreResult<(CertificateDer<'static>, PrivatePkcs8KeyDer<'static>)> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("self-signed certificate generation should not fail for a static SAN");
    let cert_der = certified.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    Ok((cert_der, key_der))
}

/// Builds a `quinn::ServerConfig` carrying a freshly minted self-signed
/// certificate, with ALPN pinned to `"king-ip"`.
pub fn server_config() -> CoreResult<quinn::ServerConfig> {
    ensure_crypto_provider();
    let (cert, key) = self_signed_cert()?;

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key.into())?;
    crypto.alpn_protocols = vec![ALPN_KING_IP.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .map_err(|err| rustls::Error::General(err.to_string()))?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(quic_crypto)))
}

/// Builds a `quinn::ClientConfig` that accepts any server certificate —
/// the Rust equivalent of the original's `InsecureSkipVerify: true`.
pub fn client_config() -> CoreResult<quinn::ClientConfig> {
    ensure_crypto_provider();

    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN_KING_IP.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|err| rustls::Error::General(err.to_string()))?;
    Ok(quinn::ClientConfig::new(Arc::new(quic_crypto)))
}

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        AcceptAnyServerCert { provider: Arc::new(rustls::crypto::ring::default_provider()) }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
