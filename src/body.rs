//! The lazy, at-most-once-consumable response body.
//!
//! Materialization methods (`text`, `json`, `form_entries`, `bytes`, `blob`)
//! take the underlying byte stream exactly once; a second call of any kind
//! fails with [`Kind::BodyAlreadyRead`]. Raw stream access via
//! [`Body::into_raw_stream`] consumes the body outright and bypasses the
//! used-flag bookkeeping — the caller takes responsibility for consumption.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::error::{Error, Kind, Result};
use crate::http::request::ByteStream;

enum State {
    Unread(ByteStream),
    Used,
}

/// The agent tags stream errors with a typed [`Error`] (e.g. `Aborted`,
/// `MalformedChunk`) boxed into the `io::Error`; unwrap it so materializers
/// surface the original kind instead of a generic EOF.
fn unwrap_stream_error(e: std::io::Error) -> Error {
    let kind = e.kind();
    match e.into_inner() {
        Some(inner) => match inner.downcast::<Error>() {
            Ok(err) => *err,
            Err(inner) => Error::new(Kind::UnexpectedEof).with(inner),
        },
        None => Error::new(Kind::UnexpectedEof).with(std::io::Error::from(kind)),
    }
}

/// An opaque, typed byte blob: the materialized body plus its content-type.
#[derive(Debug, Clone)]
pub struct Blob {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

pub struct Body {
    content_type: Option<String>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("content_type", &self.content_type)
            .field("used", &self.is_used())
            .finish()
    }
}

impl Body {
    pub fn new(content_type: Option<String>, stream: ByteStream) -> Body {
        Body {
            content_type,
            state: Mutex::new(State::Unread(stream)),
        }
    }

    pub fn empty() -> Body {
        Body::new(None, Box::pin(futures_util::stream::empty()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_used(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            State::Used
        )
    }

    fn take(&self) -> Result<ByteStream> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *guard, State::Used) {
            State::Unread(s) => Ok(s),
            State::Used => Err(Error::new(Kind::BodyAlreadyRead)),
        }
    }

    /// Consumes the body and hands back the raw chunk stream, bypassing the
    /// used-flag entirely — there is no second call to race against since
    /// `self` is moved.
    pub fn into_raw_stream(self) -> ByteStream {
        match self.state.into_inner().unwrap_or_else(|e| e.into_inner()) {
            State::Unread(s) => s,
            State::Used => Box::pin(futures_util::stream::empty()),
        }
    }

    async fn collect(&self) -> Result<Bytes> {
        let mut stream = self.take()?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(unwrap_stream_error)?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub async fn bytes(&self) -> Result<Bytes> {
        self.collect().await
    }

    pub async fn text(&self) -> Result<String> {
        let bytes = self.collect().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::new(Kind::UnsupportedContent).with(e))
    }

    pub async fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.collect().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::new(Kind::UnsupportedContent).with(e))
    }

    pub async fn form_entries(&self) -> Result<Vec<(String, String)>> {
        let is_form = self
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return Err(Error::new(Kind::UnsupportedContent));
        }
        let bytes = self.collect().await?;
        serde_urlencoded::from_bytes(&bytes).map_err(|e| Error::new(Kind::UnsupportedContent).with(e))
    }

    pub async fn blob(&self) -> Result<Blob> {
        let content_type = self.content_type.clone();
        let bytes = self.collect().await?;
        Ok(Blob { content_type, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as B;

    fn stream_of(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(|s| Ok(B::from(s))),
        ))
    }

    #[tokio::test]
    async fn text_materializes_once() {
        let body = Body::new(Some("text/plain".into()), stream_of(vec!["hello", " world"]));
        assert_eq!(body.text().await.unwrap(), "hello world");
        let err = body.bytes().await.unwrap_err();
        assert!(err.is(Kind::BodyAlreadyRead));
    }

    #[tokio::test]
    async fn form_rejects_wrong_content_type() {
        let body = Body::new(Some("application/json".into()), stream_of(vec!["{}"]));
        let err = body.form_entries().await.unwrap_err();
        assert!(err.is(Kind::UnsupportedContent));
    }

    #[tokio::test]
    async fn form_parses_urlencoded() {
        let body = Body::new(
            Some("application/x-www-form-urlencoded".into()),
            stream_of(vec!["a=1&b=2"]),
        );
        let entries = body.form_entries().await.unwrap();
        assert_eq!(entries, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
    }

    #[tokio::test]
    async fn collect_preserves_typed_error_kind() {
        let stream: ByteStream = Box::pin(futures_util::stream::once(async {
            Err(std::io::Error::other(Error::new(Kind::Aborted)))
        }));
        let body = Body::new(None, stream);
        let err = body.bytes().await.unwrap_err();
        assert!(err.is(Kind::Aborted));
    }

    #[tokio::test]
    async fn raw_stream_bypasses_used_flag() {
        let body = Body::new(None, stream_of(vec!["chunk"]));
        assert!(!body.is_used());
        let mut raw = body.into_raw_stream();
        let first = raw.next().await.unwrap().unwrap();
        assert_eq!(first, B::from("chunk"));
    }
}
