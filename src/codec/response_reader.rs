//! Status-line and header parsing, lenient about bare-LF line endings.

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use tokio::io::AsyncRead;

use crate::codec::line_reader::LineReader;
use crate::error::{unexpected_eof, Error, Kind, Result};

#[derive(Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
}

fn parse_version(token: &str) -> Result<Version> {
    match token {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        _ => Err(Error::new(Kind::UnexpectedEof).with(format!("unsupported protocol token: {token:?}"))),
    }
}

/// Parses the status line and header block from `reader`. The caller keeps
/// using the same `reader` for the body so any bytes buffered ahead of the
/// blank line terminator are not lost.
pub async fn read_response_head<R: AsyncRead + Unpin>(reader: &mut LineReader<R>) -> Result<ResponseHead> {
    let status_line = match reader.read_line_lenient().await? {
        Some(line) => line,
        None => return Err(Error::new(Kind::ConnectionClosed)),
    };

    let mut parts = status_line.splitn(3, ' ');
    let proto = parts
        .next()
        .ok_or_else(|| Error::new(Kind::UnexpectedEof).with("empty status line"))?;
    let status_str = parts
        .next()
        .ok_or_else(|| Error::new(Kind::UnexpectedEof).with("missing status code"))?;
    let status_text = parts.next().unwrap_or("").to_string();

    let version = parse_version(proto)?;
    let status = StatusCode::from_bytes(status_str.as_bytes())
        .map_err(|e| Error::new(Kind::UnexpectedEof).with(e))?;

    let mut headers = HeaderMap::new();
    loop {
        let line = reader.read_line_lenient().await?.ok_or_else(unexpected_eof)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::new(Kind::UnexpectedEof).with(format!("malformed header line: {line:?}")))?;
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::new(Kind::UnexpectedEof).with(e))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| Error::new(Kind::UnexpectedEof).with(e))?;
        headers.append(header_name, header_value);
    }

    Ok(ResponseHead {
        version,
        status,
        status_text,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_status_line_and_headers() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = LineReader::new(Cursor::new(wire.to_vec()));
        let head = read_response_head(&mut reader).await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.status_text, "OK");
        assert_eq!(head.headers.get("content-length").unwrap(), "5");
    }

    #[tokio::test]
    async fn accepts_bare_lf() {
        let wire = b"HTTP/1.1 302 Found\nLocation: /redirected-target\n\n";
        let mut reader = LineReader::new(Cursor::new(wire.to_vec()));
        let head = read_response_head(&mut reader).await.unwrap();
        assert_eq!(head.status.as_u16(), 302);
        assert_eq!(head.headers.get("location").unwrap(), "/redirected-target");
    }

    #[tokio::test]
    async fn empty_socket_is_connection_closed() {
        let wire: &[u8] = b"";
        let mut reader = LineReader::new(Cursor::new(wire.to_vec()));
        let err = read_response_head(&mut reader).await.unwrap_err();
        assert!(err.is(Kind::ConnectionClosed));
    }

    #[tokio::test]
    async fn preserves_duplicate_headers_in_order() {
        let wire = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let mut reader = LineReader::new(Cursor::new(wire.to_vec()));
        let head = read_response_head(&mut reader).await.unwrap();
        let values: Vec<&str> = head.headers.get_all("set-cookie").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn leftover_body_bytes_survive_header_parsing() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = LineReader::new(Cursor::new(wire.to_vec()));
        let _head = read_response_head(&mut reader).await.unwrap();
        let body = reader.read_some(5).await.unwrap().unwrap();
        assert_eq!(body, bytes::Bytes::from_static(b"hello"));
    }
}
