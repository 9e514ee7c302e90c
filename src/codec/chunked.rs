//! Chunked transfer-encoding state machine (RFC 7230 §4.1), lenient about
//! bare-LF line endings.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::line_reader::LineReader;
use crate::error::{malformed_chunk, unexpected_eof, Result};

const MAX_CHUNK_READ: usize = 64 * 1024;

enum State {
    Size,
    Data,
    AfterChunk,
    Trailer,
    Done,
}

/// Decodes a chunked body one chunk at a time, reading through the same
/// [`LineReader`] the status line and headers were parsed from, and handing
/// it back via [`ChunkedReader::into_inner`] so no buffered bytes are
/// dropped across the transition.
pub struct ChunkedReader<R> {
    inner: LineReader<R>,
    state: State,
    remaining: usize,
}

impl<R: AsyncRead + Unpin> ChunkedReader<R> {
    pub fn new(inner: LineReader<R>) -> Self {
        ChunkedReader {
            inner,
            state: State::Size,
            remaining: 0,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Size => {
                    let line = self.inner.read_line_lenient().await?.ok_or_else(unexpected_eof)?;
                    let trimmed = line.trim();
                    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(malformed_chunk(format!(
                            "invalid chunk size line: {trimmed:?}"
                        )));
                    }
                    let size = usize::from_str_radix(trimmed, 16).map_err(malformed_chunk)?;
                    if size == 0 {
                        self.state = State::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = State::Data;
                    }
                }
                State::Data => {
                    let want = self.remaining.min(MAX_CHUNK_READ);
                    let chunk = self.inner.read_some(want).await?.ok_or_else(unexpected_eof)?;
                    self.remaining -= chunk.len();
                    if self.remaining == 0 {
                        self.state = State::AfterChunk;
                    }
                    return Ok(Some(chunk));
                }
                State::AfterChunk => {
                    let line = self.inner.read_line_lenient().await?.ok_or_else(unexpected_eof)?;
                    if !line.is_empty() {
                        return Err(malformed_chunk("missing chunk terminator"));
                    }
                    self.state = State::Size;
                }
                State::Trailer => {
                    let line = self.inner.read_line_lenient().await?.ok_or_else(unexpected_eof)?;
                    if line.is_empty() {
                        self.state = State::Done;
                        return Ok(None);
                    }
                    // Trailer headers are discarded.
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    pub fn into_inner(self) -> LineReader<R> {
        self.inner
    }
}

/// Encodes chunks as `size_hex\r\nchunk\r\n`, skipping empty input chunks to
/// avoid an accidental premature terminator, and writing `0\r\n\r\n` on
/// finish.
pub struct ChunkedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        ChunkedWriter { inner }
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let header = format!("{:x}\r\n", data.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(data).await?;
        self.inner.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<W> {
        self.inner.write_all(b"0\r\n\r\n").await?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn decode_all(wire: &[u8]) -> Result<Vec<u8>> {
        let mut reader = ChunkedReader::new(LineReader::new(Cursor::new(wire.to_vec())));
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn decodes_three_chunks() {
        let wire = b"6\r\nchunk1\r\n6\r\nchunk2\r\n6\r\nchunk3\r\n0\r\n\r\n";
        let out = decode_all(wire).await.unwrap();
        assert_eq!(out, b"chunk1chunk2chunk3");
    }

    #[tokio::test]
    async fn accepts_bare_lf() {
        let wire = b"5\nhello\n0\n\n";
        let out = decode_all(wire).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn rejects_invalid_size_line() {
        let wire = b"zz\r\ndata\r\n0\r\n\r\n";
        let err = decode_all(wire).await.unwrap_err();
        assert!(err.is(crate::error::Kind::MalformedChunk));
    }

    #[tokio::test]
    async fn trailer_is_discarded() {
        let wire = b"4\r\ndata\r\n0\r\nX-Trailer: ignored\r\n\r\n";
        let out = decode_all(wire).await.unwrap();
        assert_eq!(out, b"data");
    }

    #[tokio::test]
    async fn leftover_bytes_after_trailer_survive_into_inner() {
        let wire = b"4\r\ndata\r\n0\r\n\r\nNEXT-RESPONSE";
        let mut reader = ChunkedReader::new(LineReader::new(Cursor::new(wire.to_vec())));
        while reader.next_chunk().await.unwrap().is_some() {}
        let mut tail = reader.into_inner();
        let rest = tail.read_some(64).await.unwrap().unwrap();
        assert_eq!(rest, Bytes::from_static(b"NEXT-RESPONSE"));
    }

    #[tokio::test]
    async fn encode_then_decode_is_identity() {
        let mut buf = Vec::new();
        {
            let mut writer = ChunkedWriter::new(&mut buf);
            writer.write_chunk(b"").await.unwrap(); // skipped
            writer.write_chunk(b"abc").await.unwrap();
            writer.write_chunk(b"defgh").await.unwrap();
            let _ = writer.finish().await.unwrap();
        }
        let out = decode_all(&buf).await.unwrap();
        assert_eq!(out, b"abcdefgh");
    }
}
