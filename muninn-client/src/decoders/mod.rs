//! Streaming decoders for `Content-Encoding` values.
//!
//! Every decoder consumes compressed input incrementally and hands back
//! whatever output is available so far; `flush` drains anything buffered at
//! end of stream. Unknown codings fall back to identity so a response with
//! an exotic encoding is still surfaced byte-for-byte.

mod chunker;

pub use chunker::{BytesChunker, TextChunker};

use std::io::Write;

use crate::error::{Error, Result};

/// Incremental decompressor for one content coding.
pub trait ContentDecoder: Send {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>>;
    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// Builds a decoder chain for a `Content-Encoding` header value. A comma
/// separated list produces a [`MultiDecoder`]; unrecognized codings decode
/// as identity.
pub fn content_decoder(content_encoding: &str) -> Box<dyn ContentDecoder> {
    let coding = content_encoding.trim();
    if coding.contains(',') {
        return Box::new(MultiDecoder::new(coding));
    }
    match coding.to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => Box::new(GzipDecoder::new()),
        "deflate" | "x-deflate" => Box::new(DeflateDecoder::new()),
        #[cfg(feature = "br")]
        "br" => Box::new(BrotliDecoder::new()),
        #[cfg(feature = "zstd")]
        "zstd" => Box::new(ZstdDecoder::new()),
        _ => Box::new(IdentityDecoder),
    }
}

/// The `Accept-Encoding` value advertising every decoder compiled in.
pub fn accept_encoding() -> &'static str {
    #[cfg(all(feature = "br", feature = "zstd"))]
    return "gzip, deflate, br, zstd";
    #[cfg(all(feature = "br", not(feature = "zstd")))]
    return "gzip, deflate, br";
    #[cfg(all(not(feature = "br"), feature = "zstd"))]
    return "gzip, deflate, zstd";
    #[cfg(all(not(feature = "br"), not(feature = "zstd")))]
    return "gzip, deflate";
}

fn decode_error(err: impl std::fmt::Display) -> Error {
    Error::RemoteProtocol(format!("failed to decode response body: {err}"))
}

pub struct IdentityDecoder;

impl ContentDecoder for IdentityDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

enum GzipState {
    Decoding,
    /// Hit an error after at least one member decoded successfully;
    /// remaining bytes are trailing garbage tolerated by other clients too.
    SwallowData,
}

/// Gzip (RFC 1952), including multi-member streams and tolerance for
/// trailing garbage once the first member decoded.
pub struct GzipDecoder {
    inner: flate2::write::MultiGzDecoder<Vec<u8>>,
    state: GzipState,
    fed: bool,
    produced: u64,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            inner: flate2::write::MultiGzDecoder::new(Vec::new()),
            state: GzipState::Decoding,
            fed: false,
            produced: 0,
        }
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for GzipDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if matches!(self.state, GzipState::SwallowData) || data.is_empty() {
            return Ok(Vec::new());
        }
        self.fed = true;
        if let Err(err) = self.inner.write_all(data) {
            let out = std::mem::take(self.inner.get_mut());
            self.produced += out.len() as u64;
            self.state = GzipState::SwallowData;
            if self.produced == 0 {
                return Err(decode_error(err));
            }
            return Ok(out);
        }
        let _ = self.inner.flush();
        let out = std::mem::take(self.inner.get_mut());
        self.produced += out.len() as u64;
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        // Never-fed decoders (empty body despite a Content-Encoding
        // header) have nothing to finalize.
        if matches!(self.state, GzipState::SwallowData) || !self.fed {
            return Ok(Vec::new());
        }
        let decoder = std::mem::replace(
            &mut self.inner,
            flate2::write::MultiGzDecoder::new(Vec::new()),
        );
        decoder.finish().map_err(decode_error)
    }
}

enum DeflateInner {
    Zlib(flate2::write::ZlibDecoder<Vec<u8>>),
    Raw(flate2::write::DeflateDecoder<Vec<u8>>),
}

/// Deflate with zlib/raw auto-detection: the zlib wrapping is tried first
/// and on error the buffered input is replayed through a raw decoder,
/// matching how browsers treat servers that send bare deflate streams.
pub struct DeflateDecoder {
    inner: DeflateInner,
    first_try: bool,
    buffered: Vec<u8>,
}

impl DeflateDecoder {
    pub fn new() -> Self {
        Self {
            inner: DeflateInner::Zlib(flate2::write::ZlibDecoder::new(Vec::new())),
            first_try: true,
            buffered: Vec::new(),
        }
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match &mut self.inner {
            DeflateInner::Zlib(decoder) => {
                decoder.write_all(data)?;
                let _ = decoder.flush();
                Ok(std::mem::take(decoder.get_mut()))
            }
            DeflateInner::Raw(decoder) => {
                decoder.write_all(data)?;
                let _ = decoder.flush();
                Ok(std::mem::take(decoder.get_mut()))
            }
        }
    }
}

impl Default for DeflateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for DeflateDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if !self.first_try {
            return self.write(data).map_err(decode_error);
        }

        self.buffered.extend_from_slice(data);
        match self.write(data) {
            Ok(out) => {
                if !out.is_empty() {
                    self.first_try = false;
                    self.buffered = Vec::new();
                }
                Ok(out)
            }
            Err(_) => {
                // Not zlib-wrapped; replay everything seen so far as raw.
                self.first_try = false;
                self.inner = DeflateInner::Raw(flate2::write::DeflateDecoder::new(Vec::new()));
                let replay = std::mem::take(&mut self.buffered);
                self.write(&replay).map_err(decode_error)
            }
        }
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        if self.first_try && self.buffered.is_empty() {
            return Ok(Vec::new());
        }
        match &mut self.inner {
            DeflateInner::Zlib(decoder) => {
                decoder.try_finish().map_err(decode_error)?;
                Ok(std::mem::take(decoder.get_mut()))
            }
            DeflateInner::Raw(decoder) => {
                decoder.try_finish().map_err(decode_error)?;
                Ok(std::mem::take(decoder.get_mut()))
            }
        }
    }
}

/// Brotli (RFC 7932).
#[cfg(feature = "br")]
pub struct BrotliDecoder {
    inner: brotli::DecompressorWriter<Vec<u8>>,
}

#[cfg(feature = "br")]
impl BrotliDecoder {
    pub fn new() -> Self {
        Self { inner: brotli::DecompressorWriter::new(Vec::new(), 8192) }
    }
}

#[cfg(feature = "br")]
impl ContentDecoder for BrotliDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.inner.write_all(data).map_err(decode_error)?;
        let _ = self.inner.flush();
        Ok(std::mem::take(self.inner.get_mut()))
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        self.inner.flush().map_err(decode_error)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }
}

/// Zstandard (RFC 8478).
#[cfg(feature = "zstd")]
pub struct ZstdDecoder {
    inner: zstd::stream::write::Decoder<'static, Vec<u8>>,
}

#[cfg(feature = "zstd")]
impl ZstdDecoder {
    pub fn new() -> Self {
        let inner = zstd::stream::write::Decoder::new(Vec::new())
            .expect("zstd decoder construction is infallible for Vec sinks");
        Self { inner }
    }
}

#[cfg(feature = "zstd")]
impl ContentDecoder for ZstdDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.inner.write_all(data).map_err(decode_error)?;
        let _ = self.inner.flush();
        Ok(std::mem::take(self.inner.get_mut()))
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        self.inner.flush().map_err(decode_error)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }
}

/// Chain for comma-separated `Content-Encoding` lists.
///
/// RFC 7231: codings are listed in the order the sender applied them, so
/// decoding applies them in reverse.
pub struct MultiDecoder {
    decoders: Vec<Box<dyn ContentDecoder>>,
}

impl MultiDecoder {
    pub fn new(content_encoding: &str) -> Self {
        let decoders = content_encoding
            .split(',')
            .rev()
            .map(|coding| content_decoder(coding.trim()))
            .collect();
        Self { decoders }
    }
}

impl ContentDecoder for MultiDecoder {
    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut data = data.to_vec();
        for decoder in &mut self.decoders {
            data = decoder.decompress(&data)?;
        }
        Ok(data)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        // Flush cascades: leftovers from each stage feed the next.
        let mut carry: Vec<u8> = Vec::new();
        let mut iter = self.decoders.iter_mut();
        if let Some(first) = iter.next() {
            carry = first.flush()?;
        }
        for decoder in iter {
            let mut out = decoder.decompress(&carry)?;
            out.extend(decoder.flush()?);
            carry = out;
        }
        Ok(carry)
    }
}
