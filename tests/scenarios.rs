//! End-to-end scenarios against a minimal loopback HTTP/1.1 server: no
//! Connector test double is needed since `http://127.0.0.1:<port>` dials
//! through the real `DirectConnector` just like a live origin would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchcore::{Agent, Client, ClientConfig, DirectConnector, Origin, PoolConfig, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Starts a loopback server that serves one canned raw HTTP/1.1 response
/// per accepted connection read, looping so the same port can answer
/// several requests issued one after another on a reused socket.
async fn serve_canned(responses: Vec<&'static [u8]>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            for body in responses {
                if consume_one_request(&mut socket).await.is_err() {
                    break;
                }
                if socket.write_all(body).await.is_err() {
                    break;
                }
            }
        }
    });
    port
}

async fn consume_one_request(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Err(std::io::Error::other("closed"));
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(());
        }
    }
}

fn url(port: u16, path: &str) -> Url {
    Url::parse(&format!("http://127.0.0.1:{port}{path}")).unwrap()
}

#[tokio::test]
async fn text_then_json_reuse_same_agent() {
    let port = serve_canned(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\nHello, World!",
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 26\r\n\r\n{\"message\":\"Hello, JSON!\"}",
    ])
    .await;

    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));

    assert!(agent.is_idle());
    let resp1 = agent.send(Request::get(url(port, "/text")).unwrap()).await.unwrap();
    assert_eq!(resp1.status().as_u16(), 200);
    assert_eq!(resp1.body().text().await.unwrap(), "Hello, World!");
    assert!(agent.is_idle());

    let resp2 = agent.send(Request::get(url(port, "/json")).unwrap()).await.unwrap();
    assert_eq!(resp2.body().text().await.unwrap(), "{\"message\":\"Hello, JSON!\"}");
    assert!(agent.is_idle());
}

#[tokio::test]
async fn redirect_is_surfaced_verbatim() {
    let port = serve_canned(vec![
        b"HTTP/1.1 302 Found\r\nLocation: /redirected-target\r\nContent-Length: 33\r\n\r\nRedirecting to /redirected-target",
    ])
    .await;

    let client = Client::new();
    let resp = client.send(Request::get(url(port, "/redirect")).unwrap()).await.unwrap();
    assert_eq!(resp.status().as_u16(), 302);
    assert!(!resp.ok());
    assert_eq!(resp.headers().get("location").unwrap(), "/redirected-target");
    assert_eq!(resp.body().text().await.unwrap(), "Redirecting to /redirected-target");

    client.close();
}

#[tokio::test]
async fn chunked_body_concatenates() {
    let port = serve_canned(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nchunk1\r\n6\r\nchunk2\r\n6\r\nchunk3\r\n0\r\n\r\n",
    ])
    .await;

    let client = Client::new();
    let resp = client.send(Request::get(url(port, "/chunked")).unwrap()).await.unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "chunk1chunk2chunk3");

    client.close();
}

#[tokio::test]
async fn gzip_body_decompresses() {
    use std::io::Write;
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(b"This is compressed content!").unwrap();
    let gz = enc.finish().unwrap();

    let mut wire = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    wire.extend_from_slice(&gz);
    let wire: &'static [u8] = Box::leak(wire.into_boxed_slice());

    let port = serve_canned(vec![wire]).await;

    let client = Client::new();
    let resp = client.send(Request::get(url(port, "/gzip")).unwrap()).await.unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "This is compressed content!");

    client.close();
}

#[tokio::test]
async fn body_materializer_is_at_most_once() {
    let port = serve_canned(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"]).await;

    let client = Client::new();
    let resp = client.send(Request::get(url(port, "/text")).unwrap()).await.unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "hi");
    let err = resp.body().bytes().await.unwrap_err();
    assert!(err.is(fetchcore::Kind::BodyAlreadyRead));

    client.close();
}

#[tokio::test]
async fn pool_never_exceeds_max_per_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    if consume_one_request(&mut socket).await.is_err() {
                        return;
                    }
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                        .await;
                });
            }
        });
    }

    let client = Client::with_config(ClientConfig::new().with_pool(PoolConfig::new().with_max_per_host(2)));
    let started = Instant::now();
    let mut handles = Vec::new();
    let client = Arc::new(client);
    for _ in 0..5 {
        let client = client.clone();
        let u = url(port, "/echo");
        handles.push(tokio::spawn(async move {
            client.send(Request::get(u).unwrap()).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(peak.load(Ordering::SeqCst) <= 2);

    client.close();
}

#[tokio::test]
async fn until_close_framing_is_never_reused() {
    // No content-length and no chunked encoding: the only way the client can
    // detect end-of-body is the peer closing the socket, and that framing is
    // never handed back to the agent for reuse regardless.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            if consume_one_request(&mut socket).await.is_ok() {
                let _ = socket.write_all(b"HTTP/1.1 200 OK\r\n\r\nno-length-body").await;
                let _ = socket.shutdown().await;
            }
        }
    });

    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));
    let resp = agent.send(Request::get(url(port, "/until-close")).unwrap()).await.unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "no-length-body");

    agent.when_idle().await;
    assert!(agent.is_idle());
    assert!(!agent.is_alive());
}

#[tokio::test]
async fn busy_agent_rejects_synchronously_without_touching_socket() {
    let port = serve_canned(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"]).await;
    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));

    let first = {
        let agent = agent.clone();
        let u = url(port, "/slot");
        tokio::spawn(async move { agent.send(Request::get(u).unwrap()).await })
    };
    // Give the first send a head start so the agent is definitely BUSY.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = tokio::time::timeout(
        Duration::from_millis(20),
        agent.send(Request::get(url(port, "/second")).unwrap()),
    )
    .await
    .expect("AgentBusy must reject immediately, not block on I/O");
    let err = second.unwrap_err();
    assert!(err.is(fetchcore::Kind::AgentBusy));

    let resp = first.await.unwrap().unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "ok");
}

#[tokio::test]
async fn origin_mismatch_preserves_existing_connection() {
    let port = serve_canned(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"]).await;
    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));

    let resp = agent.send(Request::get(url(port, "/first")).unwrap()).await.unwrap();
    assert_eq!(resp.body().text().await.unwrap(), "ok");
    assert!(agent.is_alive(), "successful content-length response leaves a reusable socket");

    let other_origin_req = Request::get(url(port + 1, "/elsewhere")).unwrap();
    let err = agent.send(other_origin_req).await.unwrap_err();
    assert!(err.is(fetchcore::Kind::OriginMismatch));

    assert!(agent.is_idle());
    assert!(agent.is_alive(), "rejecting a mismatched origin must not clobber the agent's existing socket");
}

#[tokio::test]
async fn abandoned_response_force_closes_via_drop_backstop() {
    let port = serve_canned(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"]).await;
    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));

    let resp = agent.send(Request::get(url(port, "/abandon")).unwrap()).await.unwrap();
    drop(resp); // never consumed: the body stream's Drop must reclaim the agent

    tokio::time::timeout(Duration::from_millis(500), agent.when_idle())
        .await
        .expect("Drop backstop must return the agent to IDLE");
    assert!(agent.is_idle());
    assert!(!agent.is_alive(), "an abandoned response's socket must be force-closed, not reused");
}

#[tokio::test]
async fn cancellation_during_body_streaming_aborts_and_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            if consume_one_request(&mut socket).await.is_ok() {
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nchunk1\r\n")
                    .await;
                // Stall before the next chunk so cancellation lands mid-body.
                tokio::time::sleep(Duration::from_secs(5)).await;
                let _ = socket.write_all(b"6\r\nchunk2\r\n0\r\n\r\n").await;
            }
        }
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let origin = Origin::from_url(&url(port, "/")).unwrap();
    let agent = Agent::new(origin, Arc::new(DirectConnector::new()));
    let req = Request::get(url(port, "/stream")).unwrap().with_cancel(cancel);
    let resp = agent.send(req).await.unwrap(); // headers arrive before the stall

    let err = resp.body().bytes().await.unwrap_err();
    assert!(err.is(fetchcore::Kind::Aborted));

    tokio::time::timeout(Duration::from_millis(500), agent.when_idle())
        .await
        .expect("agent must return to IDLE once the body read is aborted");
    assert!(agent.is_idle());
}

#[tokio::test]
async fn abort_during_slow_request_returns_agent_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            if consume_one_request(&mut socket).await.is_ok() {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
            }
        }
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let client = Client::new();
    let req = Request::get(url(port, "/slow")).unwrap().with_cancel(cancel);
    let err = client.send(req).await.unwrap_err();
    assert!(err.is(fetchcore::Kind::Aborted));

    client.close();
}
