//! Request model and request-body sources.
//!
//! A [`Body`] is the reusable description of what to send; each delivery
//! attempt materializes a [`BodyChunks`] iterator from it. Keeping the two
//! apart is what makes retries and 307/308 redirects replayable: in-memory
//! bodies clone cheaply, files seek back to their starting offset, and
//! one-shot streams refuse a second pass with `UnrewindableBody`.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::Method;

use crate::error::{Error, Result};
use crate::fields::Headers;
use crate::url::Url;

/// Read size for file-backed bodies.
const CHUNK_SIZE: usize = 65_536;

/// An HTTP request: method, URL, headers and an optional target override
/// (`*` for server-wide OPTIONS, absolute-form when traversing a proxy).
/// Framing headers are applied by the session, not here.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    target: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Request {
        Request { method, url, headers: Headers::new(), target: None }
    }

    /// The request target placed on the wire. Defaults to origin-form
    /// (`path[?query]`).
    pub fn target(&self) -> String {
        self.target.clone().unwrap_or_else(|| self.url.request_target())
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = Some(target.into());
    }

    /// Copy carrying everything except body state, used for history
    /// snapshots and error enrichment.
    pub fn clone_metadata(&self) -> Request {
        self.clone()
    }
}

enum BodySource {
    Empty,
    /// Raw bytes, JSON and form payloads all reduce to this.
    Memory { data: Bytes, content_type: Option<&'static str> },
    File(FileSource),
    Multipart { parts: Vec<MultipartPart>, boundary: String },
    /// One-shot chunk stream; unknown length, not replayable.
    Stream(Mutex<Option<Box<dyn Iterator<Item = Result<Bytes>> + Send>>>),
}

/// Request body description. See the module docs for replay semantics.
pub struct Body {
    source: BodySource,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.source {
            BodySource::Empty => "Empty",
            BodySource::Memory { .. } => "Memory",
            BodySource::File(_) => "File",
            BodySource::Multipart { .. } => "Multipart",
            BodySource::Stream(_) => "Stream",
        };
        f.debug_struct("Body").field("source", &name).finish()
    }
}

impl Body {
    pub fn empty() -> Body {
        Body { source: BodySource::Empty }
    }

    pub fn bytes(data: impl Into<Bytes>) -> Body {
        Body {
            source: BodySource::Memory {
                data: data.into(),
                content_type: Some("application/octet-stream"),
            },
        }
    }

    pub fn text(data: impl Into<String>) -> Body {
        Body {
            source: BodySource::Memory {
                data: Bytes::from(data.into()),
                content_type: Some("text/plain; charset=utf-8"),
            },
        }
    }

    /// Compact-encoded JSON (no whitespace between tokens).
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Body> {
        let data = serde_json::to_vec(value)?;
        Ok(Body {
            source: BodySource::Memory {
                data: Bytes::from(data),
                content_type: Some("application/json"),
            },
        })
    }

    /// `application/x-www-form-urlencoded` from key/value pairs.
    pub fn form<K: AsRef<str>, V: AsRef<str>>(pairs: impl IntoIterator<Item = (K, V)>) -> Body {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k.as_ref(), v.as_ref());
        }
        Body {
            source: BodySource::Memory {
                data: Bytes::from(serializer.finish()),
                content_type: Some("application/x-www-form-urlencoded"),
            },
        }
    }

    /// A file opened for reading. The current position is taken as the
    /// start; length comes from seeking to the end. Content type is
    /// sniffed from magic bytes first, then guessed from the filename.
    pub fn file(file: std::fs::File, filename: Option<&str>) -> Result<Body> {
        let source = FileSource::new(file, filename)?;
        Ok(Body { source: BodySource::File(source) })
    }

    pub fn multipart(form: MultipartForm) -> Body {
        Body { source: BodySource::Multipart { parts: form.parts, boundary: form.boundary } }
    }

    /// Arbitrary chunk stream. Sent with chunked transfer-encoding and not
    /// replayable on retry.
    pub fn stream<I>(iter: I) -> Body
    where
        I: Iterator<Item = Result<Bytes>> + Send + 'static,
    {
        Body { source: BodySource::Stream(Mutex::new(Some(Box::new(iter)))) }
    }

    pub fn is_empty_source(&self) -> bool {
        matches!(self.source, BodySource::Empty)
    }

    /// Total length when knowable up front; `None` means chunked framing.
    pub fn content_length(&self) -> Option<u64> {
        match &self.source {
            BodySource::Empty => Some(0),
            BodySource::Memory { data, .. } => Some(data.len() as u64),
            BodySource::File(file) => Some(file.len),
            BodySource::Multipart { parts, boundary } => {
                multipart_content_length(parts, boundary)
            }
            BodySource::Stream(_) => None,
        }
    }

    /// Content type implied by the body variant, used when the caller set
    /// no explicit `Content-Type` header.
    pub fn content_type(&self) -> Option<String> {
        match &self.source {
            BodySource::Empty => None,
            BodySource::Memory { content_type, .. } => content_type.map(str::to_string),
            BodySource::File(file) => Some(file.content_type.clone()),
            BodySource::Multipart { boundary, .. } => {
                Some(format!("multipart/form-data; boundary={boundary}"))
            }
            BodySource::Stream(_) => Some("application/octet-stream".to_string()),
        }
    }

    /// Materializes the per-attempt chunk iterator. Fails with
    /// `UnrewindableBody` when a one-shot stream is asked for a second pass.
    pub fn start_chunks(&self) -> Result<BodyChunks> {
        match &self.source {
            BodySource::Empty => Ok(BodyChunks::Empty),
            BodySource::Memory { data, .. } => Ok(BodyChunks::Memory { data: data.clone(), sent: false }),
            BodySource::File(file) => {
                file.rewind()?;
                Ok(BodyChunks::File { file: file.handle.clone(), remaining: file.len })
            }
            BodySource::Multipart { parts, boundary } => {
                Ok(BodyChunks::Segments { segments: render_multipart(parts, boundary)?, index: 0 })
            }
            BodySource::Stream(slot) => {
                let iter = slot
                    .lock()
                    .expect("body stream lock poisoned")
                    .take()
                    .ok_or(Error::UnrewindableBody)?;
                Ok(BodyChunks::Stream(iter))
            }
        }
    }
}

/// Live chunk iterator for one delivery attempt. Chunks are produced
/// synchronously; the transport pump pulls them between socket writes.
pub enum BodyChunks {
    Empty,
    Memory { data: Bytes, sent: bool },
    File { file: Arc<Mutex<std::fs::File>>, remaining: u64 },
    Segments { segments: Vec<Segment>, index: usize },
    Stream(Box<dyn Iterator<Item = Result<Bytes>> + Send>),
}

pub enum Segment {
    Bytes(Bytes),
    File { file: Arc<Mutex<std::fs::File>>, remaining: u64 },
}

impl BodyChunks {
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self {
            BodyChunks::Empty => Ok(None),
            BodyChunks::Memory { data, sent } => {
                if *sent || data.is_empty() {
                    Ok(None)
                } else {
                    *sent = true;
                    Ok(Some(data.clone()))
                }
            }
            BodyChunks::File { file, remaining } => read_file_chunk(file, remaining),
            BodyChunks::Segments { segments, index } => loop {
                let Some(segment) = segments.get_mut(*index) else {
                    return Ok(None);
                };
                match segment {
                    Segment::Bytes(data) => {
                        let chunk = std::mem::take(data);
                        *index += 1;
                        if chunk.is_empty() {
                            continue;
                        }
                        return Ok(Some(chunk));
                    }
                    Segment::File { file, remaining } => match read_file_chunk(file, remaining)? {
                        Some(chunk) => return Ok(Some(chunk)),
                        None => {
                            *index += 1;
                            continue;
                        }
                    },
                }
            },
            BodyChunks::Stream(iter) => match iter.next() {
                Some(chunk) => chunk.map(Some),
                None => Ok(None),
            },
        }
    }
}

fn read_file_chunk(file: &Arc<Mutex<std::fs::File>>, remaining: &mut u64) -> Result<Option<Bytes>> {
    if *remaining == 0 {
        return Ok(None);
    }
    let want = (*remaining).min(CHUNK_SIZE as u64) as usize;
    let mut buf = vec![0u8; want];
    let read = file.lock().expect("file body lock poisoned").read(&mut buf)?;
    if read == 0 {
        return Err(Error::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "file body shrank while sending",
        ))));
    }
    buf.truncate(read);
    *remaining -= read as u64;
    Ok(Some(Bytes::from(buf)))
}

struct FileSource {
    handle: Arc<Mutex<std::fs::File>>,
    start: u64,
    len: u64,
    content_type: String,
}

impl FileSource {
    fn new(mut file: std::fs::File, filename: Option<&str>) -> Result<FileSource> {
        let start = file.stream_position()?;
        let end = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(start))?;

        let mut magic = [0u8; 16];
        let read = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(start))?;

        let content_type = sniff_content_type(&magic[..read])
            .map(str::to_string)
            .or_else(|| {
                filename.map(|name| mime_guess::from_path(name).first_or_octet_stream().to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(FileSource {
            handle: Arc::new(Mutex::new(file)),
            start,
            len: end - start,
            content_type,
        })
    }

    fn rewind(&self) -> Result<()> {
        self.handle
            .lock()
            .expect("file body lock poisoned")
            .seek(SeekFrom::Start(self.start))?;
        Ok(())
    }
}

/// Magic-byte content sniffing for the handful of formats worth knowing.
fn sniff_content_type(magic: &[u8]) -> Option<&'static str> {
    if magic.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if magic.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if magic.starts_with(b"GIF87a") || magic.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if magic.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if magic.starts_with(b"\x1f\x8b") {
        Some("application/gzip")
    } else if magic.starts_with(b"PK\x03\x04") {
        Some("application/zip")
    } else if magic.len() >= 12 && &magic[0..4] == b"RIFF" && &magic[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

enum PartData {
    Bytes(Bytes),
    File { handle: Arc<Mutex<std::fs::File>>, start: u64, len: u64 },
}

struct MultipartPart {
    name: String,
    filename: Option<String>,
    headers: Headers,
    content_type: String,
    data: PartData,
}

/// `multipart/form-data` assembly with a random 16-byte hex boundary.
pub struct MultipartForm {
    parts: Vec<MultipartPart>,
    boundary: String,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> MultipartForm {
        let raw: [u8; 16] = rand::random();
        MultipartForm { parts: Vec::new(), boundary: hex::encode(raw) }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> MultipartForm {
        self.parts.push(MultipartPart {
            name: name.into(),
            filename: None,
            headers: Headers::new(),
            content_type: "text/plain; charset=utf-8".to_string(),
            data: PartData::Bytes(Bytes::from(value.into())),
        });
        self
    }

    pub fn bytes(
        mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> MultipartForm {
        self.parts.push(MultipartPart {
            name: name.into(),
            filename: None,
            headers: Headers::new(),
            content_type: content_type.unwrap_or("application/octet-stream").to_string(),
            data: PartData::Bytes(data.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        file: std::fs::File,
    ) -> Result<MultipartForm> {
        let filename = filename.into();
        let source = FileSource::new(file, Some(&filename))?;
        self.parts.push(MultipartPart {
            name: name.into(),
            filename: Some(filename),
            headers: Headers::new(),
            content_type: source.content_type.clone(),
            data: PartData::File { handle: source.handle, start: source.start, len: source.len },
        });
        Ok(self)
    }
}

fn part_header(part: &MultipartPart, boundary: &str) -> Bytes {
    let mut head = format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"", part.name);
    if let Some(filename) = &part.filename {
        head.push_str(&format!("; filename=\"{filename}\""));
    }
    head.push_str("\r\n");
    head.push_str(&format!("Content-Type: {}\r\n", part.content_type));
    for (name, value) in part.headers.items() {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    Bytes::from(head)
}

fn render_multipart(parts: &[MultipartPart], boundary: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in parts {
        segments.push(Segment::Bytes(part_header(part, boundary)));
        match &part.data {
            PartData::Bytes(data) => segments.push(Segment::Bytes(data.clone())),
            PartData::File { handle, start, len } => {
                handle.lock().expect("file body lock poisoned").seek(SeekFrom::Start(*start))?;
                segments.push(Segment::File { file: handle.clone(), remaining: *len });
            }
        }
        segments.push(Segment::Bytes(Bytes::from_static(b"\r\n")));
    }
    segments.push(Segment::Bytes(Bytes::from(format!("--{boundary}--\r\n"))));
    Ok(segments)
}

fn multipart_content_length(parts: &[MultipartPart], boundary: &str) -> Option<u64> {
    let mut total = 0u64;
    for part in parts {
        total += part_header(part, boundary).len() as u64;
        total += match &part.data {
            PartData::Bytes(data) => data.len() as u64,
            PartData::File { len, .. } => *len,
        };
        total += 2; // trailing CRLF
    }
    total += boundary.len() as u64 + 6; // closing delimiter
    Some(total)
}

/// Whether a method is idempotent for retry purposes.
pub(crate) fn is_idempotent(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS, Method::TRACE]
        .contains(method)
}
