//! Protocol codec for encoding/decoding stream frames
//!
//! Handles the length-prefixed text frame and the header of a file
//! transfer envelope. Decoding never consumes a partial frame: it returns
//! `Ok(None)` until the whole frame is buffered.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;

/// Maximum encoded text size (bounded by the 16-bit length prefix)
pub const MAX_TEXT_SIZE: usize = u16::MAX as usize;

/// Text length prefix size
const TEXT_PREFIX_SIZE: usize = 2;

/// Envelope fixed overhead: flag(1) + name prefix(2) + length(8)
const ENVELOPE_OVERHEAD: usize = 1 + TEXT_PREFIX_SIZE + 8;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Text too large: {0} bytes (max: {1})")]
    TextTooLarge(usize, usize),

    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid envelope length: {0}")]
    InvalidLength(i64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Header of a file transfer envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Payload is an archive that must be extracted on arrival
    pub compressed: bool,
    /// File name, final path component only
    pub file_name: String,
    /// Number of raw bytes following the header
    pub length: u64,
}

impl EnvelopeHeader {
    pub fn new(compressed: bool, file_name: impl Into<String>, length: u64) -> Self {
        Self {
            compressed,
            file_name: file_name.into(),
            length,
        }
    }
}

/// Encodes frames into the wire format
#[derive(Debug, Default)]
pub struct Encoder {
    frames: u64,
}

impl Encoder {
    pub fn new() -> Self {
        Self { frames: 0 }
    }

    /// Number of frames encoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Encode a text frame
    pub fn encode_text(&mut self, text: &str, buf: &mut BytesMut) -> CodecResult<()> {
        let bytes = text.as_bytes();
        if bytes.len() > MAX_TEXT_SIZE {
            return Err(CodecError::TextTooLarge(bytes.len(), MAX_TEXT_SIZE));
        }

        buf.reserve(TEXT_PREFIX_SIZE + bytes.len());
        buf.put_u16(bytes.len() as u16);
        buf.put_slice(bytes);

        self.frames += 1;
        Ok(())
    }

    /// Encode an envelope header; the payload bytes are written separately
    pub fn encode_header(&mut self, header: &EnvelopeHeader, buf: &mut BytesMut) -> CodecResult<()> {
        let length = i64::try_from(header.length)
            .map_err(|_| CodecError::InvalidLength(i64::MAX))?;

        buf.put_u8(u8::from(header.compressed));
        self.encode_text(&header.file_name, buf)?;
        buf.put_i64(length);
        Ok(())
    }
}

/// Decodes frames from the wire format
#[derive(Debug, Default)]
pub struct Decoder {
    frames: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Self { frames: 0 }
    }

    /// Number of frames decoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Attempt to decode a text frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode_text(&mut self, buf: &mut BytesMut) -> CodecResult<Option<String>> {
        let Some(length) = peek_text_len(buf, 0) else {
            return Ok(None);
        };
        if buf.len() < TEXT_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(TEXT_PREFIX_SIZE);
        let payload = buf.split_to(length);
        let text = String::from_utf8(payload.to_vec())?;

        self.frames += 1;
        Ok(Some(text))
    }

    /// Attempt to decode an envelope header from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode_header(&mut self, buf: &mut BytesMut) -> CodecResult<Option<EnvelopeHeader>> {
        let Some(name_len) = peek_text_len(buf, 1) else {
            return Ok(None);
        };
        if buf.len() < ENVELOPE_OVERHEAD + name_len {
            return Ok(None);
        }

        let compressed = buf.get_u8() != 0;
        buf.advance(TEXT_PREFIX_SIZE);
        let file_name = String::from_utf8(buf.split_to(name_len).to_vec())?;
        let length = buf.get_i64();
        if length < 0 {
            return Err(CodecError::InvalidLength(length));
        }

        self.frames += 1;
        Ok(Some(EnvelopeHeader {
            compressed,
            file_name,
            length: length as u64,
        }))
    }
}

/// Read a text length prefix at `offset` without consuming it
fn peek_text_len(buf: &BytesMut, offset: usize) -> Option<usize> {
    if buf.len() < offset + TEXT_PREFIX_SIZE {
        return None;
    }
    Some(u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize)
}
