//! Sans-I/O HTTP/1.1 protocol engine, client role.
//!
//! The engine never touches a socket: callers feed it inbound bytes and it
//! hands back parsed events; outbound operations return the exact bytes to
//! put on the wire. The send and receive sides advance independently, which
//! is what lets a transaction keep uploading a request body while the
//! response is already arriving.
//!
//! Send side:    `send_request` -> `send_data`* -> `send_eom`
//! Receive side: `receive_data`/`receive_eof` + `next_event` yielding
//! `Informational`* -> `Head` -> `Data`* -> `EndOfMessage`.

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode, Version};

use crate::error::{Error, Result};
use crate::fields::Headers;

const MAX_HEADERS: usize = 100;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Parsed status line + header block of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Headers,
}

/// Wire events surfaced to the transaction.
#[derive(Debug)]
pub enum InboundEvent {
    /// A 1XX response; zero or more precede the real head.
    Informational(ResponseHead),
    /// The final response head.
    Head(ResponseHead),
    Data(Bytes),
    EndOfMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    SendingBody,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum OutFraming {
    Empty,
    Length { remaining: u64 },
    Chunked,
}

#[derive(Debug, Clone, Copy)]
enum ChunkedState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy)]
enum InFraming {
    Empty,
    Length { remaining: u64 },
    Chunked(ChunkedState),
    UntilClose,
}

#[derive(Debug, Clone, Copy)]
enum RecvState {
    AwaitHead,
    Body(InFraming),
    Done,
}

/// One HTTP/1.1 connection's protocol state. Reusable across transactions
/// via [`H1Connection::start_next_cycle`].
pub struct H1Connection {
    buffer: BytesMut,
    send_state: SendState,
    out_framing: OutFraming,
    recv_state: RecvState,
    request_method: Option<Method>,
    response_until_close: bool,
    connection_close: bool,
    saw_eof: bool,
}

impl Default for H1Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl H1Connection {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            send_state: SendState::Idle,
            out_framing: OutFraming::Empty,
            recv_state: RecvState::AwaitHead,
            request_method: None,
            response_until_close: false,
            connection_close: false,
            saw_eof: false,
        }
    }

    /// Serializes the request head. `Host` is emitted first (it is
    /// required); remaining headers follow in insertion order.
    pub fn send_request(
        &mut self,
        method: &Method,
        target: &str,
        headers: &Headers,
    ) -> Result<Vec<u8>> {
        if self.send_state != SendState::Idle {
            return Err(Error::LocalProtocol("request already sent on this cycle".into()));
        }
        let host = headers
            .get_one("host")
            .ok_or_else(|| Error::LocalProtocol("request is missing a Host header".into()))?
            .to_string();
        validate_target(target)?;

        let mut wire = Vec::with_capacity(256);
        wire.extend_from_slice(method.as_str().as_bytes());
        wire.push(b' ');
        wire.extend_from_slice(target.as_bytes());
        wire.extend_from_slice(b" HTTP/1.1\r\n");
        write_field(&mut wire, "Host", &host)?;
        for (name, value) in headers.items() {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            write_field(&mut wire, name, value)?;
        }
        wire.extend_from_slice(b"\r\n");

        let framing = outbound_framing(headers)?;
        if headers.get_all("connection").iter().any(|v| contains_token(v, "close")) {
            self.connection_close = true;
        }
        self.request_method = Some(method.clone());
        self.send_state = match framing {
            OutFraming::Empty => SendState::Done,
            _ => SendState::SendingBody,
        };
        self.out_framing = framing;
        Ok(wire)
    }

    /// Frames one request-body chunk.
    pub fn send_data(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.send_state != SendState::SendingBody {
            return Err(Error::LocalProtocol("request body sent outside of body state".into()));
        }
        match &mut self.out_framing {
            OutFraming::Empty => {
                Err(Error::LocalProtocol("request declared no body but data was produced".into()))
            }
            OutFraming::Length { remaining } => {
                let len = data.len() as u64;
                if len > *remaining {
                    return Err(Error::LocalProtocol(format!(
                        "request body exceeds declared Content-Length by {} bytes",
                        len - *remaining
                    )));
                }
                *remaining -= len;
                Ok(data.to_vec())
            }
            OutFraming::Chunked => {
                if data.is_empty() {
                    return Ok(Vec::new());
                }
                let mut framed = format!("{:x}\r\n", data.len()).into_bytes();
                framed.extend_from_slice(data);
                framed.extend_from_slice(b"\r\n");
                Ok(framed)
            }
        }
    }

    /// Finishes the request body. For chunked framing this emits the final
    /// zero-length chunk; for content-length framing it emits nothing but
    /// verifies the promised byte count was sent.
    pub fn send_eom(&mut self) -> Result<Vec<u8>> {
        match self.send_state {
            SendState::Done => return Ok(Vec::new()),
            SendState::Idle => {
                return Err(Error::LocalProtocol("end of message before request head".into()))
            }
            SendState::SendingBody => {}
        }
        let wire = match self.out_framing {
            OutFraming::Empty => Vec::new(),
            OutFraming::Chunked => b"0\r\n\r\n".to_vec(),
            OutFraming::Length { remaining } => {
                if remaining > 0 {
                    return Err(Error::LocalProtocol(format!(
                        "request body ended {remaining} bytes short of Content-Length"
                    )));
                }
                Vec::new()
            }
        };
        self.send_state = SendState::Done;
        Ok(wire)
    }

    /// Feeds raw bytes received from the peer.
    pub fn receive_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            self.saw_eof = true;
        } else {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Signals that the peer closed its sending direction.
    pub fn receive_eof(&mut self) {
        self.saw_eof = true;
    }

    /// Pulls the next parsed event, or `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        match self.recv_state {
            RecvState::AwaitHead => self.parse_head(),
            RecvState::Body(framing) => self.parse_body(framing),
            RecvState::Done => Ok(None),
        }
    }

    fn parse_head(&mut self) -> Result<Option<InboundEvent>> {
        let Some(head_len) = find_head_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEAD_BYTES {
                return Err(Error::RemoteProtocol("response header block too large".into()));
            }
            if self.saw_eof {
                return Err(Error::RemoteProtocol(
                    "connection closed before a complete response arrived".into(),
                ));
            }
            return Ok(None);
        };

        let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut parsed_headers);
        let status = match parsed.parse(&self.buffer[..head_len]) {
            Ok(httparse::Status::Complete(_)) => parsed
                .code
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| Error::RemoteProtocol("response status out of range".into()))?,
            Ok(httparse::Status::Partial) => {
                return Err(Error::RemoteProtocol("malformed response head".into()))
            }
            Err(err) => return Err(Error::RemoteProtocol(format!("invalid response head: {err}"))),
        };
        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            other => {
                return Err(Error::RemoteProtocol(format!(
                    "unsupported HTTP version in response: {other:?}"
                )))
            }
        };
        let mut headers = Headers::new();
        for header in parsed.headers.iter() {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| Error::RemoteProtocol("non-UTF-8 header value".into()))?;
            headers.add(header.name, value.trim());
        }
        let _ = self.buffer.split_to(head_len);

        let head = ResponseHead { status, version, headers };
        if head.status.is_informational() {
            // Another head follows; stay in AwaitHead.
            return Ok(Some(InboundEvent::Informational(head)));
        }

        if head.headers.get_all("connection").iter().any(|v| contains_token(v, "close")) {
            self.connection_close = true;
        }
        if version == Version::HTTP_10
            && !head
                .headers
                .get_all("connection")
                .iter()
                .any(|v| contains_token(v, "keep-alive"))
        {
            self.connection_close = true;
        }

        let framing = inbound_framing(self.request_method.as_ref(), &head)?;
        self.response_until_close = matches!(framing, InFraming::UntilClose);
        self.recv_state = match framing {
            InFraming::Empty => RecvState::Body(InFraming::Empty),
            other => RecvState::Body(other),
        };
        Ok(Some(InboundEvent::Head(head)))
    }

    fn parse_body(&mut self, framing: InFraming) -> Result<Option<InboundEvent>> {
        match framing {
            InFraming::Empty => {
                self.recv_state = RecvState::Done;
                Ok(Some(InboundEvent::EndOfMessage))
            }
            InFraming::Length { remaining } => {
                if remaining == 0 {
                    self.recv_state = RecvState::Done;
                    return Ok(Some(InboundEvent::EndOfMessage));
                }
                if self.buffer.is_empty() {
                    if self.saw_eof {
                        return Err(Error::RemoteProtocol(format!(
                            "connection closed with {remaining} body bytes outstanding"
                        )));
                    }
                    return Ok(None);
                }
                let take = (self.buffer.len() as u64).min(remaining);
                let data = self.buffer.split_to(take as usize).freeze();
                self.recv_state = RecvState::Body(InFraming::Length { remaining: remaining - take });
                Ok(Some(InboundEvent::Data(data)))
            }
            InFraming::UntilClose => {
                if !self.buffer.is_empty() {
                    let data = self.buffer.split().freeze();
                    return Ok(Some(InboundEvent::Data(data)));
                }
                if self.saw_eof {
                    self.recv_state = RecvState::Done;
                    return Ok(Some(InboundEvent::EndOfMessage));
                }
                Ok(None)
            }
            InFraming::Chunked(state) => self.parse_chunked(state),
        }
    }

    fn parse_chunked(&mut self, state: ChunkedState) -> Result<Option<InboundEvent>> {
        let mut state = state;
        loop {
            match state {
                ChunkedState::Size => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return self.chunked_stalled(state);
                    };
                    let line = self.buffer.split_to(line_end + 2);
                    let text = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| Error::RemoteProtocol("non-ASCII chunk size line".into()))?;
                    let size_part = text.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_part, 16).map_err(|_| {
                        Error::RemoteProtocol(format!("invalid chunk size '{size_part}'"))
                    })?;
                    if size == 0 {
                        state = ChunkedState::Trailers;
                    } else {
                        state = ChunkedState::Data { remaining: size };
                    }
                }
                ChunkedState::Data { remaining } => {
                    if self.buffer.is_empty() {
                        return self.chunked_stalled(state);
                    }
                    let take = (self.buffer.len() as u64).min(remaining);
                    let data = self.buffer.split_to(take as usize).freeze();
                    let left = remaining - take;
                    state = if left == 0 {
                        ChunkedState::DataEnd
                    } else {
                        ChunkedState::Data { remaining: left }
                    };
                    self.recv_state = RecvState::Body(InFraming::Chunked(state));
                    return Ok(Some(InboundEvent::Data(data)));
                }
                ChunkedState::DataEnd => {
                    if self.buffer.len() < 2 {
                        return self.chunked_stalled(state);
                    }
                    let crlf = self.buffer.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(Error::RemoteProtocol("chunk data not CRLF-terminated".into()));
                    }
                    state = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return self.chunked_stalled(state);
                    };
                    let line = self.buffer.split_to(line_end + 2);
                    if line_end == 0 {
                        self.recv_state = RecvState::Done;
                        return Ok(Some(InboundEvent::EndOfMessage));
                    }
                    // Trailer fields are parsed for framing but dropped.
                    let _ = line;
                }
            }
        }
    }

    fn chunked_stalled(&mut self, state: ChunkedState) -> Result<Option<InboundEvent>> {
        self.recv_state = RecvState::Body(InFraming::Chunked(state));
        if self.saw_eof {
            return Err(Error::RemoteProtocol(
                "connection closed in the middle of a chunked body".into(),
            ));
        }
        Ok(None)
    }

    /// True once the response body has been fully delivered.
    pub fn response_complete(&self) -> bool {
        matches!(self.recv_state, RecvState::Done)
    }

    /// True once the request has been fully serialized (including EOM).
    pub fn request_complete(&self) -> bool {
        matches!(self.send_state, SendState::Done)
    }

    /// Whether this connection must be closed instead of reused.
    pub fn must_close(&self) -> bool {
        self.connection_close || self.response_until_close
    }

    /// Readies the engine for another request on the same connection.
    /// Fails when the protocol state forbids reuse (`Connection: close`,
    /// read-to-EOF framing, or an unfinished cycle).
    pub fn start_next_cycle(&mut self) -> Result<()> {
        if !self.request_complete() || !self.response_complete() {
            return Err(Error::LocalProtocol(
                "cannot reuse connection before the transaction completes".into(),
            ));
        }
        if self.must_close() {
            return Err(Error::LocalProtocol("peer requested connection close".into()));
        }
        if self.saw_eof {
            return Err(Error::LocalProtocol("peer already closed the connection".into()));
        }
        self.send_state = SendState::Idle;
        self.recv_state = RecvState::AwaitHead;
        self.request_method = None;
        self.response_until_close = false;
        Ok(())
    }
}

fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() || target.bytes().any(|b| b == b' ' || b == b'\r' || b == b'\n') {
        return Err(Error::LocalProtocol(format!("invalid request target '{target}'")));
    }
    Ok(())
}

fn write_field(wire: &mut Vec<u8>, name: &str, value: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(Error::LocalProtocol(format!("invalid header name '{name}'")));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(Error::LocalProtocol(format!("invalid value for header '{name}'")));
    }
    wire.extend_from_slice(name.as_bytes());
    wire.extend_from_slice(b": ");
    wire.extend_from_slice(value.as_bytes());
    wire.extend_from_slice(b"\r\n");
    Ok(())
}

fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
        | b'_' | b'`' | b'|' | b'~')
        || b.is_ascii_alphanumeric()
}

fn contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
}

fn outbound_framing(headers: &Headers) -> Result<OutFraming> {
    let chunked = headers
        .get_all("transfer-encoding")
        .iter()
        .any(|v| contains_token(v, "chunked"));
    if chunked {
        return Ok(OutFraming::Chunked);
    }
    match headers.get_one("content-length") {
        Some(raw) => {
            let length: u64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::LocalProtocol(format!("invalid Content-Length '{raw}'")))?;
            if length == 0 {
                Ok(OutFraming::Empty)
            } else {
                Ok(OutFraming::Length { remaining: length })
            }
        }
        None => Ok(OutFraming::Empty),
    }
}

fn inbound_framing(request_method: Option<&Method>, head: &ResponseHead) -> Result<InFraming> {
    if request_method == Some(&Method::HEAD) {
        return Ok(InFraming::Empty);
    }
    match head.status.as_u16() {
        204 | 304 => return Ok(InFraming::Empty),
        _ => {}
    }
    let chunked = head
        .headers
        .get_all("transfer-encoding")
        .iter()
        .any(|v| contains_token(v, "chunked"));
    if chunked {
        return Ok(InFraming::Chunked(ChunkedState::Size));
    }
    match head.headers.get_one("content-length") {
        Some(raw) => {
            let length: u64 = raw.trim().parse().map_err(|_| {
                Error::RemoteProtocol(format!("invalid Content-Length '{raw}' in response"))
            })?;
            if length == 0 {
                Ok(InFraming::Empty)
            } else {
                Ok(InFraming::Length { remaining: length })
            }
        }
        None => Ok(InFraming::UntilClose),
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|idx| idx + 4)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}
