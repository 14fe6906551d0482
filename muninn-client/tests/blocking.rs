//! The blocking façade drives the async core on a private runtime.

use std::io::{Read, Write};
use std::net::TcpListener;

fn spawn_std_server(response: &'static [u8]) -> (String, std::thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            if let Some(idx) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break idx + 4;
            }
            let n = stream.read(&mut chunk).unwrap();
            buf.extend_from_slice(&chunk[..n]);
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = stream.read(&mut chunk).unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        stream.write_all(response).unwrap();
        String::from_utf8_lossy(&buf).to_string()
    });
    (base, handle)
}

#[test]
fn blocking_get_round_trip() {
    let (base, server) =
        spawn_std_server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    let session = muninn_client::blocking::Session::new().unwrap();
    let mut response = session.get(format!("{base}/echo")).send().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().unwrap(), "hello");
    assert_eq!(response.encoding(), Some("utf-8"));

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /echo HTTP/1.1\r\n"), "{request}");
}

#[test]
fn blocking_json_post() {
    let (base, server) =
        spawn_std_server(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}");

    let session = muninn_client::blocking::Session::new().unwrap();
    let mut response = session
        .post(format!("{base}/api"))
        .json(&serde_json::json!({"k": "v"}))
        .send()
        .unwrap();
    let value: serde_json::Value = response.json().unwrap();
    assert!(value.as_object().unwrap().is_empty());

    let request = server.join().unwrap();
    assert!(request.contains("Content-Type: application/json\r\n"), "{request}");
}
