//! TLS behavior against a local rustls server with throwaway rcgen
//! certificates: CA trust, certificate pinning, and failure taxonomy.

use std::sync::Arc;

use muninn_client::{CaCerts, Error, PinnedCert, Session};
use rustls_pki_types::PrivateKeyDer;
use sha2::Digest as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

struct TestServer {
    base: String,
    cert_der: Vec<u8>,
    cert_pem: String,
    handle: JoinHandle<()>,
}

/// Self-signed server for `localhost` answering one request with a tiny
/// 200 response.
async fn spawn_tls_server() -> TestServer {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.der().to_vec();
    let cert_pem = cert.pem();

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(signing_key.serialize_der().into()),
        )
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("https://localhost:{}", listener.local_addr().unwrap().port());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let Ok(mut tls) = acceptor.accept(stream).await else {
            // Handshake failures are expected in the rejection tests.
            return;
        };
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            match tls.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let _ = tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecure").await;
    });

    TestServer { base, cert_der, cert_pem, handle }
}

#[tokio::test]
async fn self_signed_is_rejected_by_default_roots() {
    let server = spawn_tls_server().await;

    let session = Session::new();
    let err = session.get(format!("{}/", server.base)).send().await.unwrap_err();
    assert!(
        matches!(err.kind(), Error::Certificate(_) | Error::Tls(_)),
        "expected certificate rejection, got {err:?}"
    );
    server.handle.abort();
}

#[tokio::test]
async fn custom_ca_pem_is_trusted() {
    let server = spawn_tls_server().await;

    let session = Session::builder()
        .ca_certs(CaCerts::Pem(server.cert_pem.clone().into_bytes()))
        .build();
    let mut response = session.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "secure");
    server.handle.await.unwrap();
}

#[tokio::test]
async fn matching_pin_overrides_chain_verification() {
    let server = spawn_tls_server().await;
    let fingerprint = hex::encode(sha2::Sha256::digest(&server.cert_der));

    let session = Session::builder()
        .pin(PinnedCert::new("localhost", fingerprint).unwrap())
        .build();
    let mut response = session.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "secure");
    server.handle.await.unwrap();
}

#[tokio::test]
async fn single_bit_pin_mismatch_fails() {
    let server = spawn_tls_server().await;
    let mut fingerprint = sha2::Sha256::digest(&server.cert_der).to_vec();
    fingerprint[0] ^= 0x01;

    let session = Session::builder()
        .pin(PinnedCert::new("localhost", hex::encode(&fingerprint)).unwrap())
        .build();
    let err = session.get(format!("{}/", server.base)).send().await.unwrap_err();
    match err.kind() {
        Error::CertificateFingerprintMismatch { pinned, presented } => {
            assert_ne!(pinned, presented);
        }
        other => panic!("expected fingerprint mismatch, got {other:?}"),
    }
    server.handle.abort();
}

#[tokio::test]
async fn sha1_pin_is_accepted() {
    let server = spawn_tls_server().await;
    let fingerprint = {
        use sha1::Digest as _;
        hex::encode(sha1::Sha1::digest(&server.cert_der))
    };

    let session = Session::builder()
        .pin(PinnedCert::new("localhost", fingerprint).unwrap())
        .build();
    let response = session.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    server.handle.await.unwrap();
}

#[tokio::test]
async fn unbuildable_tls_version_range_is_config_error() {
    let server = spawn_tls_server().await;

    let session = Session::builder()
        .ca_certs(CaCerts::Pem(server.cert_pem.clone().into_bytes()))
        .tls_min_version(muninn_client::TlsVersion::V1_0)
        .tls_max_version(muninn_client::TlsVersion::V1_1)
        .build();
    let err = session.get(format!("{}/", server.base)).send().await.unwrap_err();
    assert!(matches!(err.kind(), Error::TlsVersionNotSupported { .. }), "{err:?}");
    server.handle.abort();
}
