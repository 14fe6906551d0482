//! Plain-http proxy forwarding: requests traverse the proxy in
//! absolute-form; HTTPS origins are refused (no CONNECT support).

use muninn_client::{Error, Proxies, Session, Url};
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn spawn_proxy() -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nproxied")
            .await
            .unwrap();
        String::from_utf8_lossy(&buf).to_string()
    });
    (addr, handle)
}

#[tokio::test]
async fn http_requests_traverse_proxy_in_absolute_form() {
    let (proxy_url, proxy) = spawn_proxy().await;

    let mut proxies = Proxies::new();
    proxies.insert("http", Url::parse(&proxy_url).unwrap());
    let session = Session::builder().proxies(proxies).build();

    // The origin host never resolves; only the proxy is contacted.
    let mut response = session
        .get("http://origin.invalid/resource?q=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "proxied");

    let request = proxy.await.unwrap();
    assert!(
        request.starts_with("GET http://origin.invalid/resource?q=1 HTTP/1.1\r\n"),
        "{request}"
    );
    assert!(request.contains("Host: origin.invalid\r\n"), "{request}");
}

#[tokio::test]
async fn https_through_proxy_is_refused() {
    let mut proxies = Proxies::new();
    proxies.insert("https", Url::parse("http://proxy.local:3128/").unwrap());
    let session = Session::builder().proxies(proxies).build();

    let err = session.get("https://origin.invalid/").send().await.unwrap_err();
    assert!(matches!(err.kind(), Error::Config(_)), "{err:?}");
}

#[tokio::test]
async fn no_proxy_entries_bypass_the_proxy() {
    let (base, server) = {
        // Direct server standing in for the bypassed origin.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\ndirect")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (base, handle)
    };

    let mut proxies = Proxies::new();
    proxies.insert("http", Url::parse("http://proxy.unreachable.invalid:1/").unwrap());
    proxies.no_proxy("127.0.0.1");
    let session = Session::builder().proxies(proxies).build();

    let mut response = session.get(format!("{base}/direct")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "direct");

    let request = server.await.unwrap();
    // Direct requests use origin-form, not absolute-form.
    assert!(request.starts_with("GET /direct HTTP/1.1\r\n"), "{request}");
}

#[tokio::test]
#[serial]
async fn trust_env_picks_up_proxy_variables() {
    let (proxy_url, proxy) = spawn_proxy().await;
    std::env::set_var("HTTP_PROXY", &proxy_url);

    let session = Session::new();
    let result = session.get("http://env-origin.invalid/x").send().await;
    std::env::remove_var("HTTP_PROXY");

    let mut response = result.unwrap();
    assert_eq!(response.text().await.unwrap(), "proxied");
    let request = proxy.await.unwrap();
    assert!(request.starts_with("GET http://env-origin.invalid/x HTTP/1.1\r\n"), "{request}");
}

#[tokio::test]
#[serial]
async fn trust_env_false_ignores_environment() {
    std::env::set_var("HTTP_PROXY", "http://proxy.unreachable.invalid:1/");

    let session = Session::builder().trust_env(false).build();
    // With no proxy, the unresolvable origin surfaces as a DNS failure
    // instead of a connection to the proxy.
    let err = session.get("http://does-not-exist.invalid/").send().await.unwrap_err();
    std::env::remove_var("HTTP_PROXY");

    assert!(
        matches!(err.kind(), Error::NameResolution { .. } | Error::TooManyRetries(_)),
        "{err:?}"
    );
}
