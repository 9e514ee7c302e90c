//! A single persistent buffered reader/writer threaded through a
//! connection's whole lifetime.
//!
//! Unlike layering a fresh `tokio::io::BufReader` at each parsing stage,
//! `LineReader` is constructed once per socket and handed through status
//! line parsing, header parsing, and body framing without ever being
//! unwrapped — so bytes the kernel happened to deliver ahead of a chunk
//! boundary (a pipelined response, a chunk header fused with its data in
//! the same TCP segment) are never stranded in a buffer that gets dropped.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{unexpected_eof, Error, Kind, Result};

const FILL_SIZE: usize = 8192;

pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        LineReader {
            inner,
            buf: BytesMut::new(),
        }
    }

    async fn fill_more(&mut self) -> Result<usize> {
        let mut tmp = [0u8; FILL_SIZE];
        let n = self.inner.read(&mut tmp).await?;
        if n > 0 {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }

    /// Reads one line, accepting CRLF or bare LF termination. `Ok(None)`
    /// means a clean EOF with no partial line pending.
    pub async fn read_line_lenient(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return String::from_utf8(line.to_vec())
                    .map(Some)
                    .map_err(|e| Error::new(Kind::UnexpectedEof).with(e));
            }
            if self.fill_more().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(unexpected_eof());
            }
        }
    }

    /// Reads up to `max` bytes, preferring already-buffered data. `Ok(None)`
    /// signals a clean EOF.
    pub async fn read_some(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.buf.is_empty() && self.fill_more().await? == 0 {
            return Ok(None);
        }
        let n = self.buf.len().min(max.max(1));
        Ok(Some(self.buf.split_to(n).freeze()))
    }
}

impl<R: AsyncWrite + Unpin> AsyncWrite for LineReader<R> {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_lines_then_exact_body_without_losing_pipelined_bytes() {
        let wire = b"first\r\nsecond\nPAYLOAD";
        let mut r = LineReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(r.read_line_lenient().await.unwrap().unwrap(), "first");
        assert_eq!(r.read_line_lenient().await.unwrap().unwrap(), "second");
        let rest = r.read_some(7).await.unwrap().unwrap();
        assert_eq!(rest, Bytes::from_static(b"PAYLOAD"));
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let mut r = LineReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(r.read_line_lenient().await.unwrap().is_none());
    }
}
