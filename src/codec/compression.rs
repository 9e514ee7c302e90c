//! Incremental gzip/deflate compression and decompression, driven a chunk
//! at a time as bytes arrive off (or are about to go onto) the wire.
//!
//! `flate2`'s encoders/decoders are synchronous `Write` adapters; feeding
//! them one chunk at a time and flushing after each write is the standard
//! way to drive them incrementally without buffering an entire body.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Deflate,
}

pub fn codec_from_content_encoding(value: &str) -> Option<Codec> {
    match value.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => Some(Codec::Gzip),
        "deflate" => Some(Codec::Deflate),
        _ => None,
    }
}

enum Enc {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

pub struct StreamEncoder(Enc);

impl StreamEncoder {
    pub fn new(codec: Codec) -> Self {
        StreamEncoder(match codec {
            Codec::Gzip => Enc::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
            Codec::Deflate => Enc::Deflate(DeflateEncoder::new(Vec::new(), Compression::default())),
        })
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Bytes> {
        match &mut self.0 {
            Enc::Gzip(e) => {
                e.write_all(data)?;
                e.flush()?;
                Ok(Bytes::from(std::mem::take(e.get_mut())))
            }
            Enc::Deflate(e) => {
                e.write_all(data)?;
                e.flush()?;
                Ok(Bytes::from(std::mem::take(e.get_mut())))
            }
        }
    }

    pub fn finish(self) -> Result<Bytes> {
        match self.0 {
            Enc::Gzip(e) => Ok(Bytes::from(e.finish()?)),
            Enc::Deflate(e) => Ok(Bytes::from(e.finish()?)),
        }
    }
}

enum Dec {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(DeflateDecoder<Vec<u8>>),
}

pub struct StreamDecoder(Dec);

impl StreamDecoder {
    pub fn new(codec: Codec) -> Self {
        StreamDecoder(match codec {
            Codec::Gzip => Dec::Gzip(GzDecoder::new(Vec::new())),
            Codec::Deflate => Dec::Deflate(DeflateDecoder::new(Vec::new())),
        })
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Bytes> {
        match &mut self.0 {
            Dec::Gzip(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(Bytes::from(std::mem::take(d.get_mut())))
            }
            Dec::Deflate(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(Bytes::from(std::mem::take(d.get_mut())))
            }
        }
    }

    pub fn finish(self) -> Result<Bytes> {
        match self.0 {
            Dec::Gzip(d) => Ok(Bytes::from(d.finish()?)),
            Dec::Deflate(d) => Ok(Bytes::from(d.finish()?)),
        }
    }
}
