//! Response-start serialization and chunked-body framing.
//!
//! Grounded on the teacher's `src/proto/h1/encode.rs` `Encoder`/`Kind` split
//! between chunked and fixed-length framing, simplified to owned `Vec<u8>`
//! buffers — this core's bodies already arrive fully-buffered as `Bytes`
//! (spec §4.3), so the teacher's scatter-gather `Buf`/`Take`/`Chain` machinery
//! for streaming, partially-consumed buffers has no remaining use here.

use crate::common::date;
use crate::scope::Headers;

/// How an HTTP/1.1 response body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoder {
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// `Content-Length: N`; the connection is closed once the declared
    /// length has been written (no keep-alive in this core).
    Length,
}

impl Encoder {
    pub(crate) fn is_chunked(self) -> bool {
        matches!(self, Encoder::Chunked)
    }

    /// Frame one `http.response.body` event's bytes for the wire.
    pub(crate) fn encode_body(self, body: &[u8]) -> Vec<u8> {
        match self {
            Encoder::Length => body.to_vec(),
            Encoder::Chunked => {
                if body.is_empty() {
                    return Vec::new();
                }
                let mut out = Vec::with_capacity(body.len() + 16);
                write_hex_len(&mut out, body.len());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(body);
                out.extend_from_slice(b"\r\n");
                out
            }
        }
    }

    /// The terminating `0\r\n\r\n` chunk, emitted when `more=false` and no
    /// trailers are expected. A no-op under [`Encoder::Length`].
    pub(crate) fn encode_end(self) -> Vec<u8> {
        match self {
            Encoder::Length => Vec::new(),
            Encoder::Chunked => b"0\r\n\r\n".to_vec(),
        }
    }

    /// `0\r\n<trailer headers>\r\n\r\n`, emitted instead of the plain
    /// terminator when `trailers=true` was declared on `http.response.start`.
    pub(crate) fn encode_trailers(self, headers: &Headers) -> Vec<u8> {
        debug_assert!(self.is_chunked(), "trailers require chunked framing");
        let mut out = b"0\r\n".to_vec();
        write_headers(&mut out, headers);
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn write_hex_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(format!("{len:x}").as_bytes());
}

fn write_headers(out: &mut Vec<u8>, headers: &Headers) {
    for (name, value) in headers {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
}

fn has_header(headers: &Headers, name: &str) -> bool {
    headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
}

/// Serialize a `http.response.start` event: status line, all declared
/// headers, `Transfer-Encoding: chunked` when `chunked` is true, and a
/// `Date` header if the application did not supply one (spec §4.2).
pub(crate) fn serialize_response_start(status: u16, headers: &Headers, chunked: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + headers.len() * 32);
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(reason_phrase(status).as_bytes());
    out.extend_from_slice(b"\r\n");

    write_headers(&mut out, headers);

    if chunked && !has_header(headers, "transfer-encoding") {
        out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    }
    if !has_header(headers, "date") {
        out.extend_from_slice(b"Date: ");
        date::extend(&mut out);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Canonical reason phrase for a status code; unrecognized codes fall back
/// to a generic phrase rather than failing serialization.
pub(crate) fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ if (100..600).contains(&status) => "Unknown",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_body_framing() {
        let enc = Encoder::Chunked;
        assert_eq!(enc.encode_body(b"hello"), b"5\r\nhello\r\n".to_vec());
        assert_eq!(enc.encode_body(b"!"), b"1\r\n!\r\n".to_vec());
        assert_eq!(enc.encode_end(), b"0\r\n\r\n".to_vec());
    }

    #[test]
    fn length_body_passthrough() {
        let enc = Encoder::Length;
        assert_eq!(enc.encode_body(b"hello"), b"hello".to_vec());
        assert!(enc.encode_end().is_empty());
    }

    #[test]
    fn response_start_includes_date_and_chunked() {
        let headers: Headers = vec![(
            bytes::Bytes::from_static(b"content-type"),
            bytes::Bytes::from_static(b"text/plain"),
        )];
        let out = serialize_response_start(200, &headers, true);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.contains("Date: "));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn response_start_does_not_duplicate_date() {
        let headers: Headers = vec![(
            bytes::Bytes::from_static(b"date"),
            bytes::Bytes::from_static(b"Sun, 06 Nov 1994 08:49:37 GMT"),
        )];
        let out = serialize_response_start(200, &headers, false);
        let text = String::from_utf8(out).unwrap().to_lowercase();
        assert_eq!(text.matches("date:").count(), 1);
    }
}
