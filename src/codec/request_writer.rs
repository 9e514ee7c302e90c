//! Request-line, header, and body-framing serialization.

use std::time::SystemTime;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST, TRANSFER_ENCODING};
use http::HeaderValue;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::codec::chunked::ChunkedWriter;
use crate::codec::compression::{codec_from_content_encoding, Codec, StreamEncoder};
use crate::error::{Error, Kind, Result};
use crate::http::headers::{content_length, insert_if_absent, is_chunked, rfc7231_date};
use crate::http::request::{ByteStream, Request, RequestBody};

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

fn host_header_value(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or(""), port),
        None => url.host_str().unwrap_or("").to_string(),
    }
}

fn compress_whole(bytes: Bytes, codec: Codec) -> Result<Bytes> {
    let mut enc = StreamEncoder::new(codec);
    let mut out = Vec::new();
    out.extend_from_slice(&enc.push(&bytes)?);
    out.extend_from_slice(&enc.finish()?);
    Ok(Bytes::from(out))
}

enum OutgoingBody {
    Empty,
    Sized(Bytes),
    Stream(ByteStream),
}

/// Serializes `req` onto `writer`, consuming its body. `req`'s framing must
/// already have passed [`Request::validate_framing`].
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, req: &mut Request) -> Result<()> {
    req.validate_framing()?;

    let mut headers = req.headers().clone();
    insert_if_absent(
        &mut headers,
        HOST,
        HeaderValue::from_str(&host_header_value(req.url())).map_err(|e| Error::new(Kind::MalformedRequest).with(e))?,
    );
    insert_if_absent(
        &mut headers,
        DATE,
        HeaderValue::from_str(&rfc7231_date(SystemTime::now())).map_err(|e| Error::new(Kind::MalformedRequest).with(e))?,
    );

    let codec = headers
        .get(&CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(codec_from_content_encoding);

    let outgoing = match req.take_body() {
        None => OutgoingBody::Empty,
        Some(RequestBody::Text(text)) => {
            insert_if_absent(&mut headers, CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=UTF-8"));
            let mut bytes = Bytes::from(text.into_bytes());
            if let Some(codec) = codec {
                bytes = compress_whole(bytes, codec)?;
            }
            insert_if_absent(
                &mut headers,
                CONTENT_LENGTH,
                HeaderValue::from_str(&bytes.len().to_string()).expect("digits are valid header values"),
            );
            OutgoingBody::Sized(bytes)
        }
        Some(RequestBody::Bytes(mut bytes)) => {
            insert_if_absent(&mut headers, CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
            if let Some(codec) = codec {
                bytes = compress_whole(bytes, codec)?;
            }
            insert_if_absent(
                &mut headers,
                CONTENT_LENGTH,
                HeaderValue::from_str(&bytes.len().to_string()).expect("digits are valid header values"),
            );
            OutgoingBody::Sized(bytes)
        }
        Some(RequestBody::Stream(stream)) => {
            if content_length(&headers).is_none() && !is_chunked(&headers) {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            OutgoingBody::Stream(stream)
        }
    };

    let request_line = format!("{} {} HTTP/1.1\r\n", req.method(), path_and_query(req.url()));
    writer.write_all(request_line.as_bytes()).await?;
    for (name, value) in headers.iter() {
        writer.write_all(name.as_str().as_bytes()).await?;
        writer.write_all(b": ").await?;
        writer.write_all(value.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"\r\n").await?;

    match outgoing {
        OutgoingBody::Empty => {}
        OutgoingBody::Sized(bytes) => writer.write_all(&bytes).await?,
        OutgoingBody::Stream(mut stream) => {
            let use_chunked = is_chunked(&headers);
            if use_chunked {
                let mut chunked = ChunkedWriter::new(&mut *writer);
                let mut encoder = codec.map(StreamEncoder::new);
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| Error::new(Kind::Io).with(e))?;
                    let out = match &mut encoder {
                        Some(enc) => enc.push(&chunk)?,
                        None => chunk,
                    };
                    chunked.write_chunk(&out).await?;
                }
                if let Some(enc) = encoder {
                    let tail = enc.finish()?;
                    chunked.write_chunk(&tail).await?;
                }
                chunked.finish().await?;
            } else {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| Error::new(Kind::Io).with(e))?;
                    writer.write_all(&chunk).await?;
                }
            }
        }
    }

    Ok(())
}
