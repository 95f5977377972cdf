//! Incremental HTTP/1.x request parser.
//!
//! [`RequestParser`] is a pure state machine: bytes are appended with
//! [`RequestParser::feed`] in whatever fragments the socket produced them and
//! the parser advances as far as the buffered data allows. Failures are not
//! returned as errors; the parser moves to [`ParseState::Error`] and records
//! the HTTP status that describes the failure.
//!
//! ```text
//! ParsingRequestLine → ParsingHeaders ─┬→ Complete
//!                                      ├→ ParsingBody → Complete
//!                                      └→ ParsingChunkSize ⇄ ParsingChunkData
//!                                              └→ ParsingChunkTrailer → Complete
//! ```

use bytes::{Buf, BytesMut};

use crate::http::request::{Method, Request};

/// Upper bound on the request line plus header section.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    ParsingRequestLine,
    ParsingHeaders,
    ParsingBody,
    ParsingChunkSize,
    ParsingChunkData,
    ParsingChunkTrailer,
    Complete,
    Error,
}

impl ParseState {
    /// `Complete` or `Error`: no more bytes will be consumed.
    pub fn is_terminal(self) -> bool {
        matches!(self, ParseState::Complete | ParseState::Error)
    }
}

#[derive(Debug)]
pub struct RequestParser {
    buffer: BytesMut,
    request: Request,
    state: ParseState,
    error_code: u16,
    content_length: Option<usize>,
    chunked: bool,
    chunk_remaining: usize,
    body_received: usize,
    header_bytes: usize,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_HEADER_BYTES, usize::MAX)
    }

    /// Parser that answers 413 once the header section grows past
    /// `max_header_bytes` or the body past `max_body_bytes`.
    pub fn with_limits(max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            request: Request::default(),
            state: ParseState::ParsingRequestLine,
            error_code: 0,
            content_length: None,
            chunked: false,
            chunk_remaining: 0,
            body_received: 0,
            header_bytes: 0,
            max_header_bytes,
            max_body_bytes,
        }
    }

    pub fn set_body_limit(&mut self, max_body_bytes: usize) {
        self.max_body_bytes = max_body_bytes;
    }

    /// Appends `data` and advances as far as the buffered bytes allow.
    ///
    /// Feeding an empty slice is a no-op that reports the current state.
    /// After `Complete`, new bytes are kept unconsumed for the next request;
    /// after `Error` they are dropped.
    pub fn feed(&mut self, data: &[u8]) -> ParseState {
        if self.state == ParseState::Error {
            return self.state;
        }
        self.buffer.extend_from_slice(data);
        self.advance();
        self.state
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// HTTP status describing the failure, 0 unless the state is `Error`.
    pub fn error_code(&self) -> u16 {
        self.error_code
    }

    /// The request parsed so far. Only fully populated once `Complete`.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn take_request(&mut self) -> Request {
        std::mem::take(&mut self.request)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn bytes_received(&self) -> usize {
        self.body_received
    }

    /// Buffered bytes that were not consumed by the current request.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buffer
    }

    pub fn take_unconsumed(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Resets everything but the configured limits for the next request.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.request = Request::default();
        self.state = ParseState::ParsingRequestLine;
        self.error_code = 0;
        self.content_length = None;
        self.chunked = false;
        self.chunk_remaining = 0;
        self.body_received = 0;
        self.header_bytes = 0;
    }

    fn advance(&mut self) {
        loop {
            match self.state {
                ParseState::ParsingRequestLine
                | ParseState::ParsingHeaders
                | ParseState::ParsingChunkSize
                | ParseState::ParsingChunkTrailer => {
                    let Some(line) = self.next_line() else {
                        return;
                    };
                    match std::str::from_utf8(&line) {
                        Ok(line) => self.on_line(line),
                        Err(_) => self.fail(400),
                    }
                }
                ParseState::ParsingBody => {
                    let remaining = self.content_length.unwrap_or(0) - self.body_received;
                    if !self.take_body(remaining) {
                        return;
                    }
                    if self.content_length == Some(self.body_received) {
                        self.state = ParseState::Complete;
                    }
                }
                ParseState::ParsingChunkData => {
                    if self.chunk_remaining > 0 {
                        let wanted = self.chunk_remaining;
                        if !self.take_body(wanted) {
                            return;
                        }
                        continue;
                    }
                    if self.buffer.len() < CRLF.len() {
                        return;
                    }
                    if &self.buffer[..CRLF.len()] != CRLF {
                        self.fail(400);
                        return;
                    }
                    self.buffer.advance(CRLF.len());
                    self.state = ParseState::ParsingChunkSize;
                }
                ParseState::Complete | ParseState::Error => return,
            }
        }
    }

    /// Splits one CRLF-terminated line off the buffer, without the CRLF.
    fn next_line(&mut self) -> Option<BytesMut> {
        let in_header_section = matches!(
            self.state,
            ParseState::ParsingRequestLine
                | ParseState::ParsingHeaders
                | ParseState::ParsingChunkTrailer
        );

        let Some(end) = self.buffer.windows(2).position(|w| w == CRLF) else {
            // The whole buffer is one partial line.
            if in_header_section && self.header_bytes + self.buffer.len() > self.max_header_bytes {
                self.fail(413);
            } else if !in_header_section && self.buffer.len() > self.max_header_bytes {
                self.fail(400);
            }
            return None;
        };

        let mut line = self.buffer.split_to(end + CRLF.len());
        line.truncate(end);
        if in_header_section {
            self.header_bytes += end + CRLF.len();
            if self.header_bytes > self.max_header_bytes {
                self.fail(413);
                return None;
            }
        }
        Some(line)
    }

    /// Moves up to `max` buffered bytes into the body. Returns false when
    /// nothing could be moved.
    fn take_body(&mut self, max: usize) -> bool {
        let n = max.min(self.buffer.len());
        if n == 0 && max > 0 {
            return false;
        }
        self.request.body.extend_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        self.body_received += n;
        if self.state == ParseState::ParsingChunkData {
            self.chunk_remaining -= n;
        }
        true
    }

    fn on_line(&mut self, line: &str) {
        match self.state {
            ParseState::ParsingRequestLine => self.on_request_line(line),
            ParseState::ParsingHeaders | ParseState::ParsingChunkTrailer if line.is_empty() => {
                if self.state == ParseState::ParsingHeaders {
                    self.on_headers_end();
                } else {
                    self.state = ParseState::Complete;
                }
            }
            ParseState::ParsingHeaders | ParseState::ParsingChunkTrailer => {
                self.on_header_line(line)
            }
            ParseState::ParsingChunkSize => self.on_chunk_size(line),
            _ => {}
        }
    }

    fn on_request_line(&mut self, line: &str) {
        // Stray CRLFs between keep-alive requests are tolerated.
        if line.is_empty() {
            return;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let [method, target, version] = parts.as_slice() else {
            self.fail(400);
            return;
        };

        if *version != "HTTP/1.1" && *version != "HTTP/1.0" {
            self.fail(505);
            return;
        }

        let (path, query) = target.split_once('?').unwrap_or((*target, ""));
        self.request.method = Method::parse(method);
        self.request.path = path.to_string();
        self.request.query = query.to_string();
        self.request.version = version.to_string();
        self.state = ParseState::ParsingHeaders;
    }

    fn on_header_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once(':') else {
            self.fail(400);
            return;
        };
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            self.fail(400);
            return;
        }
        let value = value.trim();

        match key.as_str() {
            "content-length" => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    self.fail(400);
                    return;
                }
                let Ok(length) = value.parse::<usize>() else {
                    self.fail(400);
                    return;
                };
                if self.chunked {
                    self.fail(400);
                    return;
                }
                self.content_length = Some(length);
            }
            "transfer-encoding" => {
                if !value.to_ascii_lowercase().ends_with("chunked") {
                    self.fail(501);
                    return;
                }
                if self.content_length.is_some() {
                    self.fail(400);
                    return;
                }
                self.chunked = true;
            }
            _ => {}
        }

        self.request.headers.insert(key, value.to_string());
    }

    fn on_headers_end(&mut self) {
        if !self.request.headers.contains_key("host") {
            self.fail(400);
            return;
        }

        if self.chunked {
            self.state = ParseState::ParsingChunkSize;
            return;
        }

        match self.content_length {
            Some(length) if length > self.max_body_bytes => self.fail(413),
            Some(length) if length > 0 => {
                self.request.body.reserve(length.min(64 * 1024));
                self.state = ParseState::ParsingBody;
            }
            _ => self.state = ParseState::Complete,
        }
    }

    fn on_chunk_size(&mut self, line: &str) {
        let size = line.split(';').next().unwrap_or("").trim();
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
            self.fail(400);
            return;
        }
        let Ok(size) = usize::from_str_radix(size, 16) else {
            self.fail(400);
            return;
        };

        if size == 0 {
            self.header_bytes = 0;
            self.state = ParseState::ParsingChunkTrailer;
            return;
        }

        if self.body_received.saturating_add(size) > self.max_body_bytes {
            self.fail(413);
            return;
        }

        self.chunk_remaining = size;
        self.state = ParseState::ParsingChunkData;
    }

    fn fail(&mut self, code: u16) {
        tracing::trace!(code, state = ?self.state, "request parse failed");
        self.error_code = code;
        self.state = ParseState::Error;
    }
}
