//! The single-connection agent: owns one socket, serializes exactly one
//! in-flight request/response, and ties the socket's fate to how the
//! response body ends up being consumed.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::chunked::ChunkedReader;
use crate::codec::compression::{codec_from_content_encoding, StreamDecoder};
use crate::codec::line_reader::LineReader;
use crate::codec::response_reader::ResponseHead;
use crate::connect::{AsyncStream, Connector};
use crate::error::{aborted, Error, Kind, Result};
use crate::http::headers::{content_encoding, content_length, get_str, is_chunked};
use crate::http::request::{ByteStream, Request};
use crate::http::response::Response;
use crate::body::Body;
use crate::origin::Origin;

type Conn = LineReader<Box<dyn AsyncStream>>;

/// Observes two independent cancellation sources and cancels a third,
/// merged token the moment either fires. Models the caller's abort token
/// composed, by logical OR, with an agent-local controller.
fn or_tokens(a: CancellationToken, b: CancellationToken) -> CancellationToken {
    let merged = CancellationToken::new();
    let watcher = merged.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = a.cancelled() => {}
            _ = b.cancelled() => {}
            _ = watcher.cancelled() => {}
        }
        watcher.cancel();
    });
    merged
}

fn io_err(e: Error) -> std::io::Error {
    std::io::Error::other(e)
}

enum Framing {
    Empty(Conn),
    ContentLength(Conn, u64),
    Chunked(ChunkedReader<Box<dyn AsyncStream>>),
    UntilClose(Conn),
}

impl Framing {
    fn into_conn(self) -> Conn {
        match self {
            Framing::Empty(c) => c,
            Framing::ContentLength(c, _) => c,
            Framing::Chunked(cr) => cr.into_inner(),
            Framing::UntilClose(c) => c,
        }
    }
}

fn decide_framing(method: &Method, status: StatusCode, headers: &mut HeaderMap, conn: Conn) -> (Framing, bool) {
    let code = status.as_u16();
    let empty_body = *method == Method::HEAD || (100..200).contains(&code) || code == 204 || code == 304;
    if empty_body {
        headers.remove(http::header::CONTENT_LENGTH);
        headers.remove(http::header::TRANSFER_ENCODING);
        headers.remove(http::header::CONTENT_ENCODING);
        return (Framing::Empty(conn), true);
    }
    if is_chunked(headers) {
        return (Framing::Chunked(ChunkedReader::new(conn)), true);
    }
    if let Some(len) = content_length(headers) {
        return (Framing::ContentLength(conn, len), true);
    }
    (Framing::UntilClose(conn), false)
}

/// Drives one response body to completion. Dropped without reaching a
/// terminal branch (the caller abandoned the response mid-stream), its
/// `Drop` impl force-closes the agent's socket — the deterministic
/// replacement for a GC-finalizer backstop.
struct BodyDriver {
    framing: Option<Framing>,
    decoder: Option<StreamDecoder>,
    cancel: CancellationToken,
    agent: Weak<Agent>,
    reusable_base: bool,
    done: bool,
}

impl Drop for BodyDriver {
    fn drop(&mut self) {
        if !self.done {
            if let Some(agent) = self.agent.upgrade() {
                agent.finish(None);
            }
        }
    }
}

enum DriverState {
    Active(BodyDriver),
    Finished,
}

type StepOutput = Option<(std::io::Result<Bytes>, DriverState)>;

fn step(state: DriverState) -> Pin<Box<dyn Future<Output = StepOutput> + Send>> {
    Box::pin(async move {
        let mut drv = match state {
            DriverState::Active(drv) => drv,
            DriverState::Finished => return None,
        };

        if drv.cancel.is_cancelled() {
            drv.done = true;
            if let Some(agent) = drv.agent.upgrade() {
                agent.finish(None);
            }
            return Some((Err(io_err(aborted())), DriverState::Finished));
        }

        let raw: std::result::Result<Option<Bytes>, Error> = match drv.framing.as_mut().expect("framing present until terminal step") {
            Framing::Empty(_) => Ok(None),
            Framing::ContentLength(reader, remaining) => {
                if *remaining == 0 {
                    Ok(None)
                } else {
                    let want = (*remaining).min(64 * 1024) as usize;
                    tokio::select! {
                        res = reader.read_some(want) => match res {
                            Ok(Some(bytes)) => { *remaining -= bytes.len() as u64; Ok(Some(bytes)) }
                            Ok(None) => Err(crate::error::unexpected_eof()),
                            Err(e) => Err(e),
                        },
                        _ = drv.cancel.cancelled() => Err(aborted()),
                    }
                }
            }
            Framing::Chunked(cr) => {
                tokio::select! {
                    res = cr.next_chunk() => res,
                    _ = drv.cancel.cancelled() => Err(aborted()),
                }
            }
            Framing::UntilClose(reader) => {
                tokio::select! {
                    res = reader.read_some(64 * 1024) => res,
                    _ = drv.cancel.cancelled() => Err(aborted()),
                }
            }
        };

        match raw {
            Err(e) => {
                drv.done = true;
                if let Some(agent) = drv.agent.upgrade() {
                    agent.finish(None);
                }
                Some((Err(io_err(e)), DriverState::Finished))
            }
            Ok(Some(bytes)) => {
                let out = match &mut drv.decoder {
                    Some(dec) => match dec.push(&bytes) {
                        Ok(b) => b,
                        Err(e) => {
                            drv.done = true;
                            if let Some(agent) = drv.agent.upgrade() {
                                agent.finish(None);
                            }
                            return Some((Err(io_err(e)), DriverState::Finished));
                        }
                    },
                    None => bytes,
                };
                if out.is_empty() {
                    // The decoder buffered internally without producing
                    // output yet; pull the next raw chunk right away.
                    step(DriverState::Active(drv)).await
                } else {
                    Some((Ok(out), DriverState::Active(drv)))
                }
            }
            Ok(None) => {
                let tail = match drv.decoder.take() {
                    Some(dec) => dec.finish(),
                    None => Ok(Bytes::new()),
                };
                drv.done = true;
                let reusable = drv.reusable_base && !drv.cancel.is_cancelled();
                let framing = drv.framing.take().expect("framing present until terminal step");
                let conn = framing.into_conn();
                if let Some(agent) = drv.agent.upgrade() {
                    agent.finish(if reusable { Some(conn) } else { None });
                } else {
                    drop(conn);
                }
                match tail {
                    Ok(tail) if !tail.is_empty() => Some((Ok(tail), DriverState::Finished)),
                    Ok(_) => None,
                    Err(e) => Some((Err(io_err(e)), DriverState::Finished)),
                }
            }
        }
    })
}

/// IDLE/BUSY state machine around one socket.
pub struct Agent {
    origin: Origin,
    connector: Arc<dyn Connector>,
    conn: StdMutex<Option<Conn>>,
    busy: AtomicBool,
    idle_notify: Notify,
    local_abort: StdMutex<Option<CancellationToken>>,
}

impl Agent {
    pub fn new(origin: Origin, connector: Arc<dyn Connector>) -> Arc<Agent> {
        Arc::new(Agent {
            origin,
            connector,
            conn: StdMutex::new(None),
            busy: AtomicBool::new(false),
            idle_notify: Notify::new(),
            local_abort: StdMutex::new(None),
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn hostname(&self) -> &str {
        &self.origin.host
    }

    pub fn port(&self) -> u16 {
        self.origin.port
    }

    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    /// True once the agent holds no socket at all (never connected, or its
    /// last connection was torn down) — used by the pool to decide whether
    /// an idle agent is worth keeping around.
    pub fn is_alive(&self) -> bool {
        self.conn.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Resolves on the next IDLE transition; resolves immediately if
    /// already idle.
    pub async fn when_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Force-aborts the in-flight request, if any. Used by the pool to tear
    /// an agent down on `close()`.
    pub fn abort(&self) {
        if let Some(token) = self.local_abort.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            token.cancel();
        }
    }

    fn finish(&self, socket: Option<Conn>) {
        debug!(origin = %self.origin, reusable = socket.is_some(), "agent onDone");
        *self.conn.lock().unwrap_or_else(|e| e.into_inner()) = socket;
        *self.local_abort.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.busy.store(false, Ordering::Release);
        self.idle_notify.notify_waiters();
    }

    /// Returns to IDLE without touching `self.conn`. Used to reject a
    /// request before any socket was dialed or taken for it, so a pooled,
    /// reusable connection from a prior send is never clobbered.
    fn reject(&self) {
        *self.local_abort.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.busy.store(false, Ordering::Release);
        self.idle_notify.notify_waiters();
    }

    async fn take_or_connect(&self) -> Result<Conn> {
        let existing = self.conn.lock().unwrap_or_else(|e| e.into_inner()).take();
        match existing {
            Some(conn) => {
                trace!(origin = %self.origin, "reusing pooled connection");
                Ok(conn)
            }
            None => {
                debug!(origin = %self.origin, "dialing new connection");
                let stream = self.connector.connect(&self.origin).await?;
                Ok(LineReader::new(stream))
            }
        }
    }

    pub async fn send(self: &Arc<Self>, mut req: Request) -> Result<Response> {
        if self.busy.swap(true, Ordering::AcqRel) {
            debug!(origin = %self.origin, "rejecting send: agent busy");
            return Err(Error::new(Kind::AgentBusy));
        }

        let req_origin = match req.origin() {
            Ok(o) => o,
            Err(e) => {
                self.reject();
                return Err(e);
            }
        };
        if req_origin != self.origin {
            self.reject();
            return Err(Error::new(Kind::OriginMismatch));
        }
        if let Err(e) = req.validate_framing() {
            self.reject();
            return Err(e);
        }

        let local = CancellationToken::new();
        *self.local_abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(local.clone());
        let cancel = match req.cancel_token() {
            Some(caller) => or_tokens(caller.clone(), local),
            None => local,
        };

        match self.send_inner(&mut req, cancel).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.finish(None);
                Err(e)
            }
        }
    }

    async fn send_inner(self: &Arc<Self>, req: &mut Request, cancel: CancellationToken) -> Result<Response> {
        let mut conn = self.take_or_connect().await?;

        let write_result = tokio::select! {
            res = crate::codec::write_request(&mut conn, req) => res,
            _ = cancel.cancelled() => Err(aborted()),
        };
        if let Err(e) = write_result {
            drop(conn);
            return Err(e);
        }

        let head_result = tokio::select! {
            res = crate::codec::read_response_head(&mut conn) => res,
            _ = cancel.cancelled() => Err(aborted()),
        };
        let mut head: ResponseHead = match head_result {
            Ok(h) => h,
            Err(e) => {
                drop(conn);
                return Err(e);
            }
        };

        let url = req.url().clone();
        let method = req.method().clone();
        let body = self.build_body(conn, &mut head, &method, cancel);

        Ok(Response::new(head.version, head.status, head.status_text, head.headers, url, body))
    }

    fn build_body(self: &Arc<Self>, conn: Conn, head: &mut ResponseHead, method: &Method, cancel: CancellationToken) -> Body {
        let (framing, reusable_base) = decide_framing(method, head.status, &mut head.headers, conn);
        let content_type = get_str(&head.headers, "content-type").map(str::to_string);
        let decoder = content_encoding(&head.headers).and_then(codec_from_content_encoding).map(StreamDecoder::new);

        let driver = BodyDriver {
            framing: Some(framing),
            decoder,
            cancel,
            agent: Arc::downgrade(self),
            reusable_base,
            done: false,
        };
        let stream: ByteStream = Box::pin(futures_util::stream::unfold(DriverState::Active(driver), step));
        Body::new(content_type, stream)
    }
}
