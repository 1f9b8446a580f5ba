//! The minimal request-body contract: the core delivers an HTTP request body
//! as a single buffered [`bytes::Bytes`] value inside one `http.request`
//! event (spec §4.3, "receive"). Streaming bodies are a permitted extension
//! but out of scope for this core (spec §9, Open Questions).

use bytes::Bytes;

/// Read exactly `len` bytes of body out of the connection's read buffer,
/// returning an empty buffer for requests with no declared length.
///
/// `buf` is expected to already contain at least `len` bytes; the connection
/// read loop only calls this once `parse_request` has reported the header
/// block complete and the caller has ensured enough bytes are buffered (for
/// a `Content-Length` body) or chunked decoding has produced the full body.
pub(crate) fn take_body(buf: &mut bytes::BytesMut, len: usize) -> Bytes {
    if len == 0 {
        return Bytes::new();
    }
    buf.split_to(len).freeze()
}
