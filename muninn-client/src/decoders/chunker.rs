//! Re-chunking helpers for the response streaming pipeline.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Re-slices an incoming byte stream into chunks of exactly `chunk_size`
/// bytes (except the final flush). Without a size, chunks pass through
/// unchanged.
pub struct BytesChunker {
    chunk_size: Option<usize>,
    buffer: BytesMut,
}

impl BytesChunker {
    pub fn new(chunk_size: Option<usize>) -> Self {
        Self { chunk_size, buffer: BytesMut::new() }
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<Bytes> {
        let Some(size) = self.chunk_size else {
            if data.is_empty() {
                return Vec::new();
            }
            return vec![Bytes::copy_from_slice(data)];
        };

        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();
        while self.buffer.len() >= size {
            out.push(self.buffer.split_to(size).freeze());
        }
        out
    }

    pub fn flush(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }
}

/// Incremental byte-to-text decoding with re-chunking by character count.
///
/// Trailing bytes of an incomplete multi-byte sequence stay buffered inside
/// the underlying decoder until the sequence completes, so chunk boundaries
/// on the wire never split a decoded character.
pub struct TextChunker {
    decoder: encoding_rs::Decoder,
    chunk_size: Option<usize>,
    pending: String,
}

impl TextChunker {
    /// `encoding` is a WHATWG label such as `utf-8`, `ascii` or
    /// `iso-8859-1`. Unknown labels fail with a configuration error.
    pub fn new(encoding: &str, chunk_size: Option<usize>) -> Result<Self> {
        let encoding = encoding_rs::Encoding::for_label(encoding.as_bytes())
            .ok_or_else(|| Error::Config(format!("unknown character encoding '{encoding}'")))?;
        Ok(Self { decoder: encoding.new_decoder(), chunk_size, pending: String::new() })
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.decode(data, false);
        self.drain(false)
    }

    pub fn flush(&mut self) -> Vec<String> {
        self.decode(&[], true);
        self.drain(true)
    }

    fn decode(&mut self, data: &[u8], last: bool) {
        let mut input = data;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(8192)
                .max(16);
            self.pending.reserve(needed);
            let (result, read, _replaced) = self.decoder.decode_to_string(input, &mut self.pending, last);
            input = &input[read..];
            match result {
                encoding_rs::CoderResult::InputEmpty => break,
                encoding_rs::CoderResult::OutputFull => continue,
            }
        }
    }

    fn drain(&mut self, last: bool) -> Vec<String> {
        let Some(size) = self.chunk_size else {
            if self.pending.is_empty() {
                return Vec::new();
            }
            return vec![std::mem::take(&mut self.pending)];
        };

        let mut out = Vec::new();
        loop {
            let mut indices = self.pending.char_indices();
            match indices.nth(size) {
                Some((byte_idx, _)) => {
                    let rest = self.pending.split_off(byte_idx);
                    out.push(std::mem::replace(&mut self.pending, rest));
                }
                None => break,
            }
        }
        if last && !self.pending.is_empty() {
            out.push(std::mem::take(&mut self.pending));
        }
        out
    }
}
