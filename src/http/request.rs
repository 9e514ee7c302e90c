//! The outbound request descriptor.

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, Method};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Kind, Result};
use crate::origin::Origin;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// One of the three request body shapes a caller may supply.
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Stream(ByteStream),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Text(t) => f.debug_tuple("Text").field(&format!("{} chars", t.len())).finish(),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&format!("{} bytes", b.len())).finish(),
            RequestBody::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

#[derive(Debug)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<RequestBody>,
    cancel: Option<CancellationToken>,
}

impl Request {
    pub fn new(url: Url, method: Method) -> Result<Request> {
        // Validate early: only http/https are supported wire schemes.
        Origin::from_url(&url)?;
        Ok(Request {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            cancel: None,
        })
    }

    pub fn get(url: Url) -> Result<Request> {
        Request::new(url, Method::GET)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn origin(&self) -> Result<Origin> {
        Origin::from_url(&self.url)
    }

    /// Validates that the framing the caller supplied is not ambiguous: a
    /// request may not carry both an explicit `content-length` and
    /// `transfer-encoding: chunked`.
    pub fn validate_framing(&self) -> Result<()> {
        let has_length = crate::http::headers::content_length(&self.headers).is_some();
        let is_chunked = crate::http::headers::is_chunked(&self.headers);
        if has_length && is_chunked {
            return Err(Error::new(Kind::MalformedRequest));
        }
        Ok(())
    }
}
