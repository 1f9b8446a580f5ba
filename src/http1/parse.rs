//! Request-line + header parsing.
//!
//! Grounded on the teacher's `src/proto/h1/parse.rs` (the `MAX_HEADERS`
//! fixed-size `httparse` header array, the "Complete vs Partial" match),
//! rewritten against this core's `Vec<(Bytes, Bytes)>` header model instead
//! of the teacher's legacy typed `Headers` container.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::scope::{Headers, Scheme};

const MAX_HEADERS: usize = 100;

/// A successfully parsed request line + header block.
#[derive(Debug)]
pub(crate) struct ParsedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) raw_path: Bytes,
    pub(crate) query_string: Bytes,
    pub(crate) http_version: &'static str,
    pub(crate) headers: Headers,
    pub(crate) content_length: Option<u64>,
}

pub(crate) enum ParseOutcome {
    /// The buffer does not yet contain a full request line + header block.
    Incomplete,
    /// A full request was parsed; `consumed` bytes should be drained from
    /// the caller's read buffer.
    Complete {
        request: ParsedRequest,
        consumed: usize,
    },
}

/// Parse a request line and headers up to the terminating CRLFCRLF.
///
/// This function performs no I/O and does not mutate `buf`; the caller
/// (the Connection State Machine) is responsible for draining `consumed`
/// bytes once a `Complete` outcome is returned.
pub(crate) fn parse_request(buf: &[u8]) -> Result<ParseOutcome> {
    if buf.is_empty() {
        return Ok(ParseOutcome::Incomplete);
    }

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);

    let status = req
        .parse(buf)
        .map_err(|e| Error::Parse(format!("invalid request line or headers: {e}")))?;

    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if buf.len() > 64 * 1024 {
                return Err(Error::TooLarge(
                    "request line and headers exceeded 64KiB without completing".into(),
                ));
            }
            return Ok(ParseOutcome::Incomplete);
        }
    };

    let method = req
        .method
        .ok_or_else(|| Error::Parse("missing method".into()))?
        .to_ascii_uppercase();

    let full_path = req.path.ok_or_else(|| Error::Parse("missing path".into()))?;
    let (path_part, query_part) = match full_path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (full_path, ""),
    };

    let http_version = match req.version {
        Some(0) => "1.0",
        Some(1) => "1.1",
        other => {
            return Err(Error::Parse(format!(
                "unsupported HTTP version: {other:?}"
            )))
        }
    };

    let mut headers: Headers = Vec::with_capacity(req.headers.len());
    let mut cookie_parts: Vec<Bytes> = Vec::new();

    for h in req.headers.iter() {
        let name = h.name.to_ascii_lowercase();
        let value = Bytes::copy_from_slice(h.value);
        if name == "cookie" {
            cookie_parts.push(value);
        } else {
            headers.push((Bytes::from(name), value));
        }
    }
    if !cookie_parts.is_empty() {
        let joined = cookie_parts
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect::<Vec<_>>()
            .join("; ");
        headers.push((Bytes::from_static(b"cookie"), Bytes::from(joined)));
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n.as_ref() == b"content-length")
        .and_then(|(_, v)| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let request = ParsedRequest {
        method,
        path: path_part.to_string(),
        raw_path: Bytes::copy_from_slice(path_part.as_bytes()),
        query_string: Bytes::copy_from_slice(query_part.as_bytes()),
        http_version,
        headers,
        content_length,
    };

    Ok(ParseOutcome::Complete { request, consumed })
}

/// Drain `consumed` bytes from the front of `buf`, as the spec's §4.2
/// "consumed bytes are removed from the buffer" step.
pub(crate) fn advance(buf: &mut BytesMut, consumed: usize) {
    let _ = buf.split_to(consumed);
}

pub(crate) fn scheme_for(is_tls: bool) -> Scheme {
    if is_tls {
        Scheme::Https
    } else {
        Scheme::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let buf = b"GET /foo?bar=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        match parse_request(buf).unwrap() {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.method, "GET");
                assert_eq!(request.path, "/foo");
                assert_eq!(&request.query_string[..], b"bar=1");
                assert_eq!(request.http_version, "1.1");
                assert_eq!(consumed, buf.len());
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_request_yields_incomplete() {
        let buf = b"GET / HTTP/1.1\r\nHost: example";
        match parse_request(buf).unwrap() {
            ParseOutcome::Incomplete => {}
            ParseOutcome::Complete { .. } => panic!("expected incomplete"),
        }
    }

    #[test]
    fn duplicate_cookie_headers_are_joined() {
        let buf = b"GET / HTTP/1.1\r\nCookie: a=1\r\nHost: x\r\nCookie: b=2\r\n\r\n";
        match parse_request(buf).unwrap() {
            ParseOutcome::Complete { request, .. } => {
                let cookies: Vec<_> = request
                    .headers
                    .iter()
                    .filter(|(n, _)| n.as_ref() == b"cookie")
                    .collect();
                assert_eq!(cookies.len(), 1);
                assert_eq!(&cookies[0].1[..], b"a=1; b=2");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn header_names_are_lowercased() {
        let buf = b"GET / HTTP/1.1\r\nHOST: example.com\r\n\r\n";
        match parse_request(buf).unwrap() {
            ParseOutcome::Complete { request, .. } => {
                assert_eq!(request.headers[0].0.as_ref(), b"host");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn malformed_request_line_is_an_error() {
        let buf = b"NOT A REQUEST\r\n\r\n";
        assert!(parse_request(buf).is_err());
    }
}
