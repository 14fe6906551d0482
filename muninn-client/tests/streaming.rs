//! Response streaming pipeline tests: content decoding, charset
//! detection, and re-chunking, driven over real sockets by scripted
//! single-connection servers.

use std::io::Write as _;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use muninn_client::{Method, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn spawn_one_shot(response: Vec<u8>) -> (String, JoinHandle<()>) {
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
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        stream.write_all(&response).await.unwrap();
    });
    (base, handle)
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn chunked(pieces: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for piece in pieces {
        out.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        out.extend_from_slice(piece);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

fn response(headers: &[&str], body: &[u8]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\n".to_vec();
    for header in headers {
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[tokio::test]
async fn gzip_over_chunked_transfer_encoding() {
    let compressed = gzip(b"abcde");
    // Split the gzip stream across two transfer chunks.
    let (first, second) = compressed.split_at(compressed.len() / 2);
    let wire = response(
        &["Transfer-Encoding: chunked", "Content-Encoding: gzip"],
        &chunked(&[first, second]),
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/data")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"abcde");
    server.await.unwrap();
}

#[tokio::test]
async fn multi_coding_decodes_in_reverse_order() {
    // Applied deflate then gzip, so the header lists "deflate, gzip".
    let body = gzip(&zlib(b"nested payload"));
    let wire = response(
        &[&format!("Content-Length: {}", body.len()), "Content-Encoding: deflate, gzip"],
        &body,
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/data")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"nested payload");
    server.await.unwrap();
}

#[tokio::test]
async fn unknown_content_encoding_passes_through() {
    let wire = response(&["Content-Length: 6", "Content-Encoding: sdch"], b"opaque");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/data")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"opaque");
    server.await.unwrap();
}

#[tokio::test]
async fn empty_body_pins_ascii_encoding() {
    let wire = response(&["Content-Length: 0"], b"");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/nothing")).send().await.unwrap();
    assert!(resp.data().await.unwrap().is_empty());
    assert_eq!(resp.encoding(), Some("ascii"));
    server.await.unwrap();
}

#[tokio::test]
async fn no_content_status_yields_empty_body() {
    let mut wire = b"HTTP/1.1 204 No Content\r\n\r\n".to_vec();
    // Anything after the head must not be mistaken for a body.
    wire.extend_from_slice(b"");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/gone")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    assert!(resp.data().await.unwrap().is_empty());
    assert_eq!(resp.encoding(), Some("ascii"));
    server.await.unwrap();
}

#[tokio::test]
async fn head_request_body_is_empty_despite_content_length() {
    let wire = response(&["Content-Length: 42"], b"");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session
        .request(Method::HEAD, format!("{base}/meta"))
        .send()
        .await
        .unwrap();
    assert!(resp.data().await.unwrap().is_empty());
    assert_eq!(resp.headers().get_one("content-length"), Some("42"));
    server.await.unwrap();
}

#[tokio::test]
async fn charset_parameter_wins_over_detection() {
    // 0xE9 is 'é' in latin-1 and invalid UTF-8.
    let wire = response(
        &["Content-Length: 9", "Content-Type: text/plain; charset=iso-8859-1"],
        b"caf\xe9 time",
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/latin")).send().await.unwrap();
    assert_eq!(resp.encoding(), Some("iso-8859-1"));
    assert_eq!(resp.text().await.unwrap(), "café time");
    server.await.unwrap();
}

#[tokio::test]
async fn utf8_body_is_detected_without_charset_header() {
    let body = "smørrebrød og kaffe".as_bytes();
    let wire = response(&[&format!("Content-Length: {}", body.len())], body);
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/utf8")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "smørrebrød og kaffe");
    assert_eq!(resp.encoding(), Some("utf-8"));
    server.await.unwrap();
}

#[tokio::test]
async fn stream_rechunks_to_exact_sizes() {
    let wire = response(&["Content-Length: 10"], b"0123456789");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/data")).send().await.unwrap();
    let mut sizes = Vec::new();
    {
        let mut stream = resp.stream(Some(4));
        while let Some(chunk) = stream.next().await.unwrap() {
            sizes.push(chunk.len());
        }
    }
    assert_eq!(sizes, vec![4, 4, 2]);
    server.await.unwrap();
}

#[tokio::test]
async fn stream_text_holds_split_multibyte_sequences() {
    // Chunked so the é straddles a network chunk boundary.
    let wire = response(
        &["Transfer-Encoding: chunked", "Content-Type: text/plain; charset=utf-8"],
        &chunked(&[b"caf\xc3", b"\xa9!"]),
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/text")).send().await.unwrap();
    let mut collected = String::new();
    {
        let mut stream = resp.stream_text(None);
        while let Some(piece) = stream.next().await.unwrap() {
            collected.push_str(&piece);
        }
    }
    assert_eq!(collected, "café!");
    server.await.unwrap();
}

#[tokio::test]
async fn json_parses_response_body() {
    let body = br#"{"name":"muninn","flights":2}"#;
    let wire = response(
        &[&format!("Content-Length: {}", body.len()), "Content-Type: application/json"],
        body,
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/api")).send().await.unwrap();
    let value: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(value["name"], "muninn");
    assert_eq!(value["flights"], 2);
    server.await.unwrap();
}

#[tokio::test]
async fn data_is_cached_across_calls() {
    let wire = response(&["Content-Length: 4"], b"once");
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/data")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"once");
    assert_eq!(&resp.data().await.unwrap()[..], b"once");
    assert_eq!(resp.text().await.unwrap(), "once");
    server.await.unwrap();
}

#[tokio::test]
async fn read_until_close_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut chunk = [0u8; 4096];
        let mut buf = Vec::new();
        loop {
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        // No framing headers at all: the body runs until we close.
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nuntil the very end").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let session = Session::new();
    let mut resp = session.get(format!("{base}/stream")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "until the very end");
    server.await.unwrap();
}

#[cfg(feature = "br")]
#[tokio::test]
async fn brotli_content_encoding() {
    let mut body = Vec::new();
    {
        let mut encoder = brotli::CompressorWriter::new(&mut body, 4096, 5, 22);
        encoder.write_all(b"brotli body").unwrap();
    }
    let wire = response(
        &[&format!("Content-Length: {}", body.len()), "Content-Encoding: br"],
        &body,
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/br")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"brotli body");
    server.await.unwrap();
}

#[cfg(feature = "zstd")]
#[tokio::test]
async fn zstd_content_encoding() {
    let body = zstd::stream::encode_all(&b"zstd body"[..], 3).unwrap();
    let wire = response(
        &[&format!("Content-Length: {}", body.len()), "Content-Encoding: zstd"],
        &body,
    );
    let (base, server) = spawn_one_shot(wire).await;

    let session = Session::new();
    let mut resp = session.get(format!("{base}/zstd")).send().await.unwrap();
    assert_eq!(&resp.data().await.unwrap()[..], b"zstd body");
    server.await.unwrap();
}
