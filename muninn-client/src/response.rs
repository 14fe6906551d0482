//! Response model and the streaming decode pipeline:
//! raw bytes → content decoding → charset detection → re-chunking.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use http::{StatusCode, Version};

use crate::decoders::{content_decoder, BytesChunker, ContentDecoder, TextChunker};
use crate::error::{Error, Result};
use crate::fields::Headers;
use crate::h1::ResponseHead;
use crate::request::Request;
use crate::transaction::ResponseBody;

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Detector pin threshold: once this many bytes have been seen without a
/// charset decision, the encoding is pinned anyway.
const DETECT_LIMIT: u64 = 4096;

/// Body-less snapshot of a response: what history entries and enriched
/// errors carry. Headers are cloned, the body is gone by construction.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Headers,
    pub request: Option<Request>,
    /// Filled in when the snapshot travels on an error, so the caller can
    /// see how the lifecycle got there.
    pub history: Vec<ResponseSnapshot>,
}

impl ResponseSnapshot {
    pub(crate) fn from_head(head: &ResponseHead) -> ResponseSnapshot {
        ResponseSnapshot {
            status: head.status,
            version: head.version,
            headers: head.headers.clone(),
            request: None,
            history: Vec::new(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        REDIRECT_STATUSES.contains(&self.status.as_u16()) && self.headers.contains("location")
    }

    /// `HTTP/1.1`-style version string.
    pub fn http_version(&self) -> String {
        format!("{:?}", self.version)
    }
}

/// An HTTP response whose body is a lazy byte sequence. Metadata is
/// available immediately after the head arrives; the body streams on
/// demand and the underlying connection returns to the pool once drained.
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: Headers,
    request: Option<Request>,
    history: Vec<ResponseSnapshot>,
    body: Option<ResponseBody>,
    content: Option<Bytes>,
    encoding: Option<String>,
}

impl Response {
    pub(crate) fn from_parts(
        head: ResponseHead,
        request: Request,
        history: Vec<ResponseSnapshot>,
        body: ResponseBody,
    ) -> Response {
        let encoding = charset_from_headers(&head.headers);
        Response {
            status: head.status,
            version: head.version,
            headers: head.headers,
            request: Some(request),
            history,
            body: Some(body),
            content: None,
            encoding,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// `HTTP/1.1`-style version string.
    pub fn http_version(&self) -> String {
        format!("{:?}", self.version)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Informational (1XX) and redirect predecessors, oldest first.
    pub fn history(&self) -> &[ResponseSnapshot] {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut Vec<ResponseSnapshot> {
        &mut self.history
    }

    /// A redirect status code paired with a `Location` header.
    pub fn is_redirect(&self) -> bool {
        REDIRECT_STATUSES.contains(&self.status.as_u16()) && self.headers.contains("location")
    }

    /// The discovered (or header-declared) body character encoding. `None`
    /// until the body has been read far enough to decide.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding = Some(encoding.into());
    }

    /// Errors with [`Error::Status`] when the status code is 400 or above.
    pub fn raise_for_status(&self) -> Result<()> {
        if self.status.as_u16() >= 400 {
            Err(Error::Status(self.status.as_u16()).with_response(self.snapshot()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status,
            version: self.version,
            headers: self.headers.clone(),
            request: self.request.clone(),
            history: Vec::new(),
        }
    }

    /// Streams the decoded body. With a `chunk_size`, every yielded chunk
    /// is exactly that long except the last.
    pub fn stream(&mut self, chunk_size: Option<usize>) -> ByteStream<'_> {
        let body = self.body.take();
        let decoder = content_decoder(
            self.headers.get_folded("content-encoding").as_deref().unwrap_or("identity"),
        );
        ByteStream {
            response: self,
            body,
            decoder,
            chunker: BytesChunker::new(chunk_size),
            detector: chardetng::EncodingDetector::new(),
            non_ascii_seen: false,
            received: 0,
            queue: VecDeque::new(),
            done: false,
        }
    }

    /// Streams the body decoded to text. `chunk_size` counts characters of
    /// the decoded string, not wire bytes.
    pub fn stream_text(&mut self, chunk_size: Option<usize>) -> TextStream<'_> {
        TextStream {
            inner: self.stream(None),
            chunk_size,
            chunker: None,
            backlog: BytesMut::new(),
            queue: VecDeque::new(),
            done: false,
        }
    }

    /// The full decoded body. Cached: repeated calls are free.
    pub async fn data(&mut self) -> Result<Bytes> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        if self.body.is_none() {
            return Err(Error::BodyConsumed);
        }
        let mut collected = BytesMut::new();
        {
            let mut stream = self.stream(None);
            while let Some(chunk) = stream.next().await? {
                collected.extend_from_slice(&chunk);
            }
        }
        let content = collected.freeze();
        self.content = Some(content.clone());
        Ok(content)
    }

    /// The body decoded with the discovered encoding.
    pub async fn text(&mut self) -> Result<String> {
        let data = self.data().await?;
        let label = self.encoding.clone().unwrap_or_else(|| "utf-8".to_string());
        let encoding =
            encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&data);
        Ok(text.into_owned())
    }

    /// The body parsed as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let text = self.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Drains and discards the rest of the body so the connection can
    /// return to the pool.
    pub async fn close(&mut self) -> Result<()> {
        if self.body.is_some() {
            let mut stream = self.stream(None);
            while stream.next().await?.is_some() {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("history", &self.history.len())
            .finish()
    }
}

fn charset_from_headers(headers: &Headers) -> Option<String> {
    let content_type = headers.get_one("content-type")?;
    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else { continue };
        if key.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            // Only honor labels that name a codec we can actually use.
            if encoding_rs::Encoding::for_label(value.as_bytes()).is_some() {
                return Some(value.to_ascii_lowercase());
            }
            return None;
        }
    }
    None
}

/// Decoded byte stream over a response body; see [`Response::stream`].
pub struct ByteStream<'a> {
    response: &'a mut Response,
    body: Option<ResponseBody>,
    decoder: Box<dyn ContentDecoder>,
    chunker: BytesChunker,
    detector: chardetng::EncodingDetector,
    non_ascii_seen: bool,
    received: u64,
    queue: VecDeque<Bytes>,
    done: bool,
}

impl ByteStream<'_> {
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.queue.pop_front() {
                return Ok(Some(chunk));
            }
            if self.done {
                return Ok(None);
            }
            let Some(body) = self.body.as_mut() else {
                return Err(Error::BodyConsumed);
            };
            match body.next_chunk().await? {
                Some(raw) => {
                    let decoded = self.decoder.decompress(&raw)?;
                    self.observe(&decoded);
                    for chunk in self.chunker.feed(&decoded) {
                        self.queue.push_back(chunk);
                    }
                }
                None => {
                    let tail = self.decoder.flush()?;
                    self.observe(&tail);
                    for chunk in self.chunker.feed(&tail) {
                        self.queue.push_back(chunk);
                    }
                    if let Some(last) = self.chunker.flush() {
                        self.queue.push_back(last);
                    }
                    self.finalize_encoding();
                    self.done = true;
                }
            }
        }
    }

    /// The encoding as currently known; pinned mid-stream once the
    /// detector decides, final after end of stream.
    pub fn encoding(&self) -> Option<&str> {
        self.response.encoding.as_deref()
    }

    fn observe(&mut self, decoded: &[u8]) {
        self.received += decoded.len() as u64;
        if self.response.encoding.is_some() || decoded.is_empty() {
            return;
        }
        if !decoded.is_ascii() {
            self.non_ascii_seen = true;
        }
        self.detector.feed(decoded, false);
        if self.received > DETECT_LIMIT {
            self.pin_encoding();
        }
    }

    fn pin_encoding(&mut self) {
        // Pure ASCII gives the detector nothing to work with; fall through
        // to the utf-8 default rather than pinning a legacy codepage.
        let encoding = if self.non_ascii_seen {
            self.detector.guess(None, true).name().to_ascii_lowercase()
        } else {
            "utf-8".to_string()
        };
        self.response.encoding = Some(encoding);
    }

    fn finalize_encoding(&mut self) {
        if self.response.encoding.is_some() {
            return;
        }
        if self.received == 0 {
            self.response.encoding = Some("ascii".to_string());
        } else {
            self.pin_encoding();
        }
    }
}

/// Decoded text stream over a response body; see [`Response::stream_text`].
///
/// Until the charset is pinned, incoming bytes accumulate in a backlog;
/// once known the backlog flushes through the incremental decoder, so no
/// text is emitted under a guessed-then-revised encoding.
pub struct TextStream<'a> {
    inner: ByteStream<'a>,
    chunk_size: Option<usize>,
    chunker: Option<TextChunker>,
    backlog: BytesMut,
    queue: VecDeque<String>,
    done: bool,
}

impl TextStream<'_> {
    pub async fn next(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(text) = self.queue.pop_front() {
                return Ok(Some(text));
            }
            if self.done {
                return Ok(None);
            }
            match self.inner.next().await? {
                Some(chunk) => {
                    if let Some(encoding) = self.inner.encoding().map(str::to_string) {
                        self.flush_backlog(&encoding)?;
                        let chunker = self.chunker.as_mut().expect("chunker built by flush");
                        self.queue.extend(chunker.feed(&chunk));
                    } else {
                        self.backlog.extend_from_slice(&chunk);
                    }
                }
                None => {
                    let encoding = self
                        .inner
                        .encoding()
                        .map(str::to_string)
                        .unwrap_or_else(|| "utf-8".to_string());
                    self.flush_backlog(&encoding)?;
                    let chunker = self.chunker.as_mut().expect("chunker built by flush");
                    self.queue.extend(chunker.flush());
                    self.done = true;
                }
            }
        }
    }

    fn flush_backlog(&mut self, encoding: &str) -> Result<()> {
        if self.chunker.is_none() {
            self.chunker = Some(TextChunker::new(encoding, self.chunk_size)?);
        }
        if !self.backlog.is_empty() {
            let backlog = self.backlog.split();
            let chunker = self.chunker.as_mut().expect("just built");
            self.queue.extend(chunker.feed(&backlog));
        }
        Ok(())
    }
}
