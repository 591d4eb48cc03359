//! TLS client setup and certificate expiry
//!
//! Probes never verify certificate chains: a route with an expired or
//! self-signed certificate must still be measured, and its expiry reported.

use crate::error::{AppError, AppResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Accepts every server certificate
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client configuration used for every HTTPS probe
pub fn client_config() -> AppResult<Arc<rustls::ClientConfig>> {
    let mut config =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| AppError::Internal(format!("tls protocol version error: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Earliest of the given expiry times, ignoring unset and zero values
pub fn earliest_expiry(
    expiries: impl IntoIterator<Item = Option<SystemTime>>,
) -> Option<SystemTime> {
    expiries
        .into_iter()
        .flatten()
        .filter(|expiry| *expiry != UNIX_EPOCH)
        .min()
}

/// Earliest `notAfter` across a peer certificate chain
///
/// Certificates that fail to parse are ignored.
pub fn chain_expiry(chain: &[CertificateDer<'_>]) -> Option<SystemTime> {
    earliest_expiry(chain.iter().map(|der| not_after(der.as_ref())))
}

fn not_after(der: &[u8]) -> Option<SystemTime> {
    let (_, certificate) = X509Certificate::from_der(der).ok()?;
    let timestamp = certificate.validity().not_after.timestamp();
    let seconds = u64::try_from(timestamp).ok().filter(|s| *s > 0)?;
    Some(UNIX_EPOCH + Duration::from_secs(seconds))
}
