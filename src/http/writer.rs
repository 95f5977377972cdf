//! Response serialization with send-progress tracking.
//!
//! A [`ResponseWriter`] owns one outgoing response. Until
//! [`ResponseWriter::materialize`] runs it is a mutable [`Response`]; after
//! that it is an immutable wire buffer plus a cursor recording how many bytes
//! the socket has accepted.

use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::response::{Response, StatusCode};

pub const SERVER_NAME: &str = concat!("webserv/", env!("CARGO_PKG_VERSION"));

fn serialize_response(resp: &Response) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.put_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.put_slice(&resp.body);

    buf.freeze()
}

#[derive(Debug, Default)]
pub struct ResponseWriter {
    response: Response,
    buffer: Bytes,
    written: usize,
    materialized: bool,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer loaded with a handler's response, not yet materialized.
    pub fn from_response(response: Response) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.response.version = version.into();
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.response.set_header(key, value);
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.response.body = body.into();
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Injects the default headers and freezes the wire bytes.
    ///
    /// Only the first call has an effect; the serialized bytes never change
    /// afterwards.
    pub fn materialize(&mut self) {
        if self.materialized {
            return;
        }
        let resp = &mut self.response;

        if resp.header("date").is_none() {
            resp.set_header("Date", httpdate::fmt_http_date(SystemTime::now()));
        }
        if resp.header("server").is_none() {
            resp.set_header("Server", SERVER_NAME);
        }
        if resp.header("connection").is_none() {
            resp.set_header("Connection", "close");
        }
        if resp.status.forbids_body() {
            resp.remove_header("content-length");
            resp.body.clear();
        } else if resp.header("content-length").is_none() {
            let length = resp.body.len().to_string();
            resp.set_header("Content-Length", length);
        }

        self.buffer = serialize_response(resp);
        self.written = 0;
        self.materialized = true;
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    /// The serialized response, empty before `materialize`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes_sent(&self) -> usize {
        self.written
    }

    /// The unsent tail of the wire bytes, `None` once everything went out.
    pub fn next_chunk(&self) -> Option<&[u8]> {
        if self.written < self.buffer.len() {
            Some(&self.buffer[self.written..])
        } else {
            None
        }
    }

    /// Records `n` more bytes as accepted by the socket.
    pub fn mark_sent(&mut self, n: usize) {
        self.written = self.written.saturating_add(n).min(self.buffer.len());
    }

    pub fn is_complete(&self) -> bool {
        !self.buffer.is_empty() && self.written == self.buffer.len()
    }

    /// Materialized bytes remain to be sent.
    pub fn has_pending(&self) -> bool {
        self.written < self.buffer.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sends_advance_cursor() {
        let mut writer = ResponseWriter::from_response(Response::ok("hello"));
        writer.materialize();
        let total = writer.len();

        writer.mark_sent(3);
        assert_eq!(writer.next_chunk().map(<[u8]>::len), Some(total - 3));
        assert!(!writer.is_complete());

        writer.mark_sent(total);
        assert_eq!(writer.bytes_sent(), total);
        assert!(writer.next_chunk().is_none());
        assert!(writer.is_complete());
    }

    #[test]
    fn empty_writer_is_never_complete() {
        let writer = ResponseWriter::new();
        assert!(!writer.is_complete());
        assert!(!writer.has_pending());
        assert!(writer.next_chunk().is_none());
    }

    #[test]
    fn second_materialize_keeps_bytes() {
        let mut writer = ResponseWriter::from_response(Response::ok("a"));
        writer.materialize();
        let first = writer.as_bytes().to_vec();

        writer.set_body("changed");
        writer.materialize();
        assert_eq!(writer.as_bytes(), first.as_slice());
    }
}
