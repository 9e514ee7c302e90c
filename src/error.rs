//! Error types for the wire engine.
//!
//! Modeled on a typed `Kind` plus an opaque `Error` wrapper carrying an
//! optional boxed source, so callers can match on `kind()` without being
//! coupled to the underlying transport error type.

use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// Semantic error kinds surfaced to callers for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// URL scheme is neither `http` nor `https`.
    UnsupportedProtocol,
    /// Request URL's origin differs from the agent's bound origin.
    OriginMismatch,
    /// A second `send` was attempted on an in-flight agent.
    AgentBusy,
    /// EOF before the response could be parsed.
    ConnectionClosed,
    /// EOF mid-header or mid-body.
    UnexpectedEof,
    /// Chunked decoder encountered an invalid size line or missing framing.
    MalformedChunk,
    /// Second materialization of a body.
    BodyAlreadyRead,
    /// Form materialization on a non-urlencoded body, or multipart request body.
    UnsupportedContent,
    /// Operation cancelled by the caller or by an agent-local controller.
    Aborted,
    /// Ambiguous or otherwise malformed request framing (e.g. both
    /// `content-length` and `transfer-encoding: chunked` supplied).
    MalformedRequest,
    /// Low-level I/O failure (connect, read, write, TLS handshake).
    Io,
    /// The pool was closed while a caller was waiting for an agent.
    PoolClosed,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::UnsupportedProtocol => "unsupported protocol",
            Kind::OriginMismatch => "request origin does not match agent origin",
            Kind::AgentBusy => "agent busy",
            Kind::ConnectionClosed => "connection closed before response",
            Kind::UnexpectedEof => "unexpected end of stream",
            Kind::MalformedChunk => "malformed chunked encoding",
            Kind::BodyAlreadyRead => "body stream already read",
            Kind::UnsupportedContent => "unsupported content for materialization",
            Kind::Aborted => "operation aborted",
            Kind::MalformedRequest => "malformed request framing",
            Kind::Io => "i/o error",
            Kind::PoolClosed => "pool closed",
        };
        f.write_str(s)
    }
}

pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(Inner { kind, source: None }),
        }
    }

    #[must_use = "Error builder methods return a new Error and should be used"]
    pub fn with<E: Into<BoxError>>(mut self, source: E) -> Error {
        self.inner.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    pub fn is(&self, kind: Kind) -> bool {
        self.inner.kind == kind
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("fetchcore::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(Kind::Io).with(e)
    }
}

pub fn aborted() -> Error {
    Error::new(Kind::Aborted)
}

pub fn malformed_chunk<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::MalformedChunk).with(e)
}

pub fn unexpected_eof() -> Error {
    Error::new(Kind::UnexpectedEof)
}
