//! Client-side TLS context construction.
//!
//! Builds a `rustls::ClientConfig` from the connection configuration:
//! min/max version gating, ALPN derived from the allowed HTTP versions,
//! CA loading, and the pin mode where chain verification is replaced by a
//! certificate fingerprint check after the handshake.

mod pin;

pub use pin::{verify_pinned_certificate, PinSet, PinnedCert};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use http::Version;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use tokio_rustls::rustls;

use crate::error::{CertificateKind, Error, Result};

/// TLS protocol version specifier. The sentinels resolve to the lowest and
/// highest version this client can actually speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    MinimumSupported,
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    MaximumSupported,
}

impl TlsVersion {
    /// Numeric rank used for range comparisons; sentinels resolve first.
    fn rank(self) -> u16 {
        match self {
            TlsVersion::MinimumSupported => TlsVersion::V1_2.rank(),
            TlsVersion::V1_0 => 10,
            TlsVersion::V1_1 => 11,
            TlsVersion::V1_2 => 12,
            TlsVersion::V1_3 => 13,
            TlsVersion::MaximumSupported => TlsVersion::V1_3.rank(),
        }
    }

    /// Resolves the `MINIMUM_SUPPORTED` / `MAXIMUM_SUPPORTED` sentinels.
    pub fn resolve(self) -> TlsVersion {
        match self {
            TlsVersion::MinimumSupported => TlsVersion::V1_2,
            TlsVersion::MaximumSupported => TlsVersion::V1_3,
            other => other,
        }
    }

    pub(crate) fn in_range(self, min: TlsVersion, max: TlsVersion) -> bool {
        let rank = self.rank();
        min.rank() <= rank && rank <= max.rank()
    }

    pub(crate) fn from_protocol(version: rustls::ProtocolVersion) -> Option<TlsVersion> {
        match version {
            rustls::ProtocolVersion::TLSv1_0 => Some(TlsVersion::V1_0),
            rustls::ProtocolVersion::TLSv1_1 => Some(TlsVersion::V1_1),
            rustls::ProtocolVersion::TLSv1_2 => Some(TlsVersion::V1_2),
            rustls::ProtocolVersion::TLSv1_3 => Some(TlsVersion::V1_3),
            _ => None,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TlsVersion::MinimumSupported => "MINIMUM_SUPPORTED",
            TlsVersion::V1_0 => "TLSv1",
            TlsVersion::V1_1 => "TLSv1.1",
            TlsVersion::V1_2 => "TLSv1.2",
            TlsVersion::V1_3 => "TLSv1.3",
            TlsVersion::MaximumSupported => "MAXIMUM_SUPPORTED",
        };
        f.write_str(name)
    }
}

/// Where trust anchors come from. The identity takes part in connection
/// pool keys, so two configs trusting different bundles never share a
/// socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CaCerts {
    /// The bundled webpki root set (the process-wide default bundle).
    #[default]
    Bundled,
    /// PEM file on disk.
    File(PathBuf),
    /// In-memory PEM data.
    Pem(Vec<u8>),
}

/// ALPN protocol id for an HTTP version; `None` means the version does not
/// advertise ALPN (HTTP/1.0).
pub(crate) fn alpn_protocol(version: Version) -> Option<&'static [u8]> {
    match version {
        Version::HTTP_2 => Some(b"h2"),
        Version::HTTP_11 => Some(b"http/1.1"),
        _ => None,
    }
}

pub(crate) fn alpn_to_http_version(proto: Option<&[u8]>) -> Version {
    match proto {
        Some(b"h2") => Version::HTTP_2,
        Some(b"http/1.1") => Version::HTTP_11,
        _ => Version::HTTP_11,
    }
}

fn protocol_versions(
    min: TlsVersion,
    max: TlsVersion,
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>> {
    let (resolved_min, resolved_max) = (min.resolve(), max.resolve());
    let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
    if TlsVersion::V1_2.in_range(resolved_min, resolved_max) {
        versions.push(&rustls::version::TLS12);
    }
    if TlsVersion::V1_3.in_range(resolved_min, resolved_max) {
        versions.push(&rustls::version::TLS13);
    }
    if versions.is_empty() {
        return Err(Error::TlsVersionNotSupported { min, max });
    }
    Ok(versions)
}

fn load_root_store(ca_certs: &CaCerts) -> Result<rustls::RootCertStore> {
    let mut store = rustls::RootCertStore::empty();
    match ca_certs {
        CaCerts::Bundled => {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        CaCerts::File(path) => {
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| Error::Config(format!("failed to read CA file {path:?}: {e}")))?;
            for cert in certs {
                let cert =
                    cert.map_err(|e| Error::Config(format!("invalid CA PEM in {path:?}: {e}")))?;
                store
                    .add(cert)
                    .map_err(|e| Error::Config(format!("rejected CA cert in {path:?}: {e}")))?;
            }
        }
        CaCerts::Pem(data) => {
            for cert in CertificateDer::pem_slice_iter(data) {
                let cert = cert.map_err(|e| Error::Config(format!("invalid CA PEM: {e}")))?;
                store.add(cert).map_err(|e| Error::Config(format!("rejected CA cert: {e}")))?;
            }
        }
    }
    Ok(store)
}

/// Accept-everything verifier used in pin mode: the chain and hostname are
/// deliberately not checked, the leaf fingerprint comparison after the
/// handshake is the sole authentication step.
#[derive(Debug)]
struct PinModeVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl PinModeVerifier {
    fn new() -> Self {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        Self { schemes: provider.signature_verification_algorithms.supported_schemes() }
    }
}

impl rustls::client::danger::ServerCertVerifier for PinModeVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}

/// Builds the client TLS context for one connection attempt.
///
/// SSLv2/SSLv3 and TLS compression cannot be expressed with rustls at all,
/// so the "disable unconditionally" rule holds by construction. When `pin`
/// is set, chain and hostname verification are disabled and the caller must
/// run [`verify_pinned_certificate`] on the leaf after the handshake.
pub fn build_client_config(
    ca_certs: &CaCerts,
    pin: Option<&PinnedCert>,
    http_versions: &[Version],
    tls_min_version: TlsVersion,
    tls_max_version: TlsVersion,
) -> Result<rustls::ClientConfig> {
    let versions = protocol_versions(tls_min_version, tls_max_version)?;
    let builder = rustls::ClientConfig::builder_with_protocol_versions(&versions);

    let mut config = if pin.is_some() {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinModeVerifier::new()))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(load_root_store(ca_certs)?).with_no_client_auth()
    };

    config.alpn_protocols =
        http_versions.iter().filter_map(|v| alpn_protocol(*v)).map(<[u8]>::to_vec).collect();
    Ok(config)
}

/// Translates a failed handshake into the certificate/TLS error taxonomy.
pub(crate) fn classify_handshake_error(err: &std::io::Error) -> Error {
    let Some(tls_err) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) else {
        return Error::Tls(err.to_string());
    };
    match tls_err {
        rustls::Error::InvalidCertificate(cert_err) => {
            let kind = match cert_err {
                rustls::CertificateError::Expired => CertificateKind::Expired,
                rustls::CertificateError::NotValidForName => CertificateKind::HostnameMismatch,
                rustls::CertificateError::NotValidForNameContext { .. } => {
                    CertificateKind::HostnameMismatch
                }
                rustls::CertificateError::UnknownIssuer => CertificateKind::SelfSigned,
                other => CertificateKind::Other(format!("{other:?}")),
            };
            Error::Certificate(kind)
        }
        rustls::Error::PeerIncompatible(reason) => Error::Tls(format!("peer incompatible: {reason:?}")),
        rustls::Error::AlertReceived(rustls::AlertDescription::ProtocolVersion) => {
            Error::TlsVersionNotSupported {
                min: TlsVersion::MinimumSupported,
                max: TlsVersion::MaximumSupported,
            }
        }
        other => Error::Tls(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_resolve_to_supported_range() {
        assert_eq!(TlsVersion::MinimumSupported.resolve(), TlsVersion::V1_2);
        assert_eq!(TlsVersion::MaximumSupported.resolve(), TlsVersion::V1_3);
    }

    #[test]
    fn version_range_membership() {
        assert!(TlsVersion::V1_2.in_range(TlsVersion::V1_2, TlsVersion::V1_3));
        assert!(!TlsVersion::V1_3.in_range(TlsVersion::V1_0, TlsVersion::V1_2));
    }

    #[test]
    fn unbuildable_range_is_rejected() {
        let err = protocol_versions(TlsVersion::V1_0, TlsVersion::V1_1).unwrap_err();
        assert!(matches!(err, Error::TlsVersionNotSupported { .. }));
    }

    #[test]
    fn alpn_map() {
        assert_eq!(alpn_protocol(Version::HTTP_2), Some(&b"h2"[..]));
        assert_eq!(alpn_protocol(Version::HTTP_11), Some(&b"http/1.1"[..]));
        assert_eq!(alpn_protocol(Version::HTTP_10), None);
        assert_eq!(alpn_to_http_version(Some(b"h2")), Version::HTTP_2);
        assert_eq!(alpn_to_http_version(None), Version::HTTP_11);
    }

    #[test]
    fn default_config_builds_with_bundled_roots() {
        let config = build_client_config(
            &CaCerts::Bundled,
            None,
            &[Version::HTTP_11],
            TlsVersion::MinimumSupported,
            TlsVersion::MaximumSupported,
        )
        .unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn pin_mode_builds_without_roots() {
        let pin = PinnedCert::new("example.com", "a".repeat(64)).unwrap();
        let config = build_client_config(
            &CaCerts::Bundled,
            Some(&pin),
            &[Version::HTTP_11],
            TlsVersion::MinimumSupported,
            TlsVersion::MaximumSupported,
        );
        assert!(config.is_ok());
    }
}
