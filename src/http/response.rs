//! The inbound response descriptor.

use http::{HeaderMap, StatusCode, Version};
use url::Url;

use crate::body::Body;

#[derive(Debug)]
pub struct Response {
    version: Version,
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    url: Url,
    body: Body,
}

impl Response {
    pub fn new(
        version: Version,
        status: StatusCode,
        status_text: String,
        headers: HeaderMap,
        url: Url,
        body: Body,
    ) -> Response {
        Response {
            version,
            status,
            status_text,
            headers,
            url,
            body,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True for status codes in `[200, 300)`.
    pub fn ok(&self) -> bool {
        self.status.as_u16() >= 200 && self.status.as_u16() < 300
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_used(&self) -> bool {
        self.body.is_used()
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}
