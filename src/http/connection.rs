use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Interest, Registry, Token};

use crate::config::Config;
use crate::handler::{Handler, RouteContext};
use crate::http::parser::{ParseState, RequestParser};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::server::listener::ListenAddr;
use crate::server::socket::{IoOutcome, Socket};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle, no byte of the next request seen yet
    AwaitingRequest,
    /// Part of a request has been buffered
    Receiving,
    /// The handler is producing a response
    Processing,
    /// Response bytes are being written
    Sending,
    /// Marked for teardown
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Response sent without keep-alive
    Completed,
    /// Orderly shutdown by the client
    PeerClosed,
    /// Read or write failed
    IoError,
    /// No activity within the idle timeout
    TimedOut,
    /// The server is stopping
    Shutdown,
}

impl CloseReason {
    pub fn is_error(self) -> bool {
        self == CloseReason::IoError
    }
}

/// One accepted client connection.
///
/// Owns the socket, the request parser and the response writer, and moves
/// between [`ConnectionState`]s as readiness events arrive:
///
/// ```text
/// AwaitingRequest → Receiving → Processing → Sending ─┬→ AwaitingRequest (keep-alive)
///                                                     └→ Done
/// ```
///
/// The connection never removes itself; the event loop tears down every
/// connection in `Done` after dispatching a batch of events.
pub struct Connection {
    socket: Socket,
    token: Token,
    listen: ListenAddr,
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    parser: RequestParser,
    writer: ResponseWriter,
    keep_alive: bool,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
    last_activity: Instant,
    registered: Option<Interest>,
    served: u64,
}

impl Connection {
    pub fn new(
        socket: Socket,
        token: Token,
        listen: ListenAddr,
        config: Arc<Config>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let body_limit = config
            .find_config(&listen.host, listen.port, "")
            .map_or(usize::MAX, |server| server.client_max_body_size);
        let parser = RequestParser::with_limits(config.max_header_bytes, body_limit);

        Self {
            socket,
            token,
            listen,
            config,
            handler,
            parser,
            writer: ResponseWriter::new(),
            keep_alive: false,
            state: ConnectionState::AwaitingRequest,
            close_reason: None,
            last_activity: Instant::now(),
            registered: None,
            served: 0,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Done
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Responses fully written on this connection.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// Response bytes are waiting for write readiness.
    pub fn wants_write(&self) -> bool {
        self.state == ConnectionState::Sending && self.writer.has_pending()
    }

    pub fn interest(&self) -> Interest {
        if self.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Registers or re-registers the socket when the wanted interest changed.
    pub fn sync_registration(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = self.interest();
        match self.registered {
            Some(current) if current == wanted => Ok(()),
            Some(_) => {
                self.socket.reregister(registry, self.token, wanted)?;
                self.registered = Some(wanted);
                Ok(())
            }
            None => {
                self.socket.register(registry, self.token, wanted)?;
                self.registered = Some(wanted);
                Ok(())
            }
        }
    }

    pub fn deregister(&mut self, registry: &Registry) {
        if self.registered.take().is_some() {
            if let Err(e) = self.socket.deregister(registry) {
                tracing::debug!(token = self.token.0, error = %e, "Deregister failed");
            }
        }
    }

    /// Handles read readiness: drains the socket into the parser and, once a
    /// request is complete or malformed, prepares the response.
    ///
    /// Read events that arrive while a response is in flight are left in the
    /// socket; they are drained after the keep-alive reset.
    pub fn on_readable(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::AwaitingRequest | ConnectionState::Receiving
        ) {
            return;
        }
        if self.drain_socket() {
            self.after_read();
        }
    }

    /// Handles write readiness: writes until the response is done or the
    /// socket would block.
    pub fn on_writable(&mut self) {
        while self.state == ConnectionState::Sending {
            let Some(chunk) = self.writer.next_chunk() else {
                self.finish_response();
                continue;
            };

            match self.socket.write(chunk) {
                IoOutcome::Transferred(n) => {
                    self.writer.mark_sent(n);
                    self.last_activity = Instant::now();
                }
                IoOutcome::WouldBlock => return,
                IoOutcome::PeerClosed => {
                    tracing::warn!(token = self.token.0, peer = %self.socket.peer_addr(), "Peer closed during write");
                    self.close(CloseReason::IoError);
                }
                IoOutcome::Fatal(e) => {
                    tracing::warn!(token = self.token.0, peer = %self.socket.peer_addr(), error = %e, "Write failed");
                    self.close(CloseReason::IoError);
                }
            }
        }
    }

    /// Closes the connection when idle for longer than `timeout` at `now`.
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.is_closed() || now.saturating_duration_since(self.last_activity) <= timeout {
            return false;
        }
        tracing::info!(token = self.token.0, peer = %self.socket.peer_addr(), state = ?self.state, "Connection timed out");
        self.close(CloseReason::TimedOut);
        true
    }

    /// Marks the connection for teardown. Repeated calls keep the first reason.
    pub fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Done {
            return;
        }
        tracing::debug!(token = self.token.0, peer = %self.socket.peer_addr(), ?reason, "Connection marked for teardown");
        self.state = ConnectionState::Done;
        self.close_reason = Some(reason);
    }

    /// Reads until the socket would block or the parser stops consuming.
    /// Returns false if the connection was closed.
    fn drain_socket(&mut self) -> bool {
        let mut buf = [0u8; READ_CHUNK];

        while !self.parser.state().is_terminal() {
            match self.socket.read(&mut buf) {
                IoOutcome::Transferred(n) => {
                    self.last_activity = Instant::now();
                    tracing::trace!(token = self.token.0, bytes = n, "Read");
                    self.parser.feed(&buf[..n]);
                }
                IoOutcome::WouldBlock => break,
                IoOutcome::PeerClosed => {
                    self.close(CloseReason::PeerClosed);
                    return false;
                }
                IoOutcome::Fatal(e) => {
                    tracing::warn!(token = self.token.0, peer = %self.socket.peer_addr(), error = %e, "Read failed");
                    self.close(CloseReason::IoError);
                    return false;
                }
            }
        }
        true
    }

    fn after_read(&mut self) {
        match self.parser.state() {
            ParseState::Complete => self.process_request(),
            ParseState::Error => self.respond_with_error(self.parser.error_code()),
            ParseState::ParsingRequestLine if self.parser.unconsumed().is_empty() => {
                self.state = ConnectionState::AwaitingRequest;
            }
            _ => self.state = ConnectionState::Receiving,
        }
    }

    fn process_request(&mut self) {
        self.state = ConnectionState::Processing;
        let request = self.parser.take_request();
        tracing::debug!(
            token = self.token.0,
            method = %request.method,
            path = %request.path,
            "Request received"
        );

        let ctx = RouteContext {
            config: &self.config,
            listen_host: &self.listen.host,
            listen_port: self.listen.port,
            peer: self.socket.peer_addr(),
        };
        let mut response = self.handler.handle(&request, &ctx);

        self.keep_alive = request.keep_alive() && !response.closes_connection();
        response.version = request.version.clone();
        response.set_header(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        self.start_sending(response);
    }

    fn respond_with_error(&mut self, code: u16) {
        let status = StatusCode::from_u16(code);
        tracing::warn!(token = self.token.0, peer = %self.socket.peer_addr(), status = code, "Malformed request");

        let mut response = Response::error_page(status);
        let version = &self.parser.request().version;
        if !version.is_empty() {
            response.version = version.clone();
        }
        response.set_header("Connection", "close");
        self.keep_alive = false;
        self.start_sending(response);
    }

    fn start_sending(&mut self, response: Response) {
        self.writer = ResponseWriter::from_response(response);
        self.writer.materialize();
        self.state = ConnectionState::Sending;
    }

    fn finish_response(&mut self) {
        self.served += 1;
        tracing::debug!(
            token = self.token.0,
            status = self.writer.response().status.as_u16(),
            bytes = self.writer.bytes_sent(),
            keep_alive = self.keep_alive,
            "Response sent"
        );

        if self.keep_alive {
            self.reset();
        } else {
            self.close(CloseReason::Completed);
        }
    }

    /// Prepares for the next request on the same socket. Bytes already
    /// buffered past the previous request are parsed first.
    fn reset(&mut self) {
        let leftover = self.parser.take_unconsumed();
        self.parser.clear();
        self.writer.clear();
        self.keep_alive = false;
        self.state = ConnectionState::AwaitingRequest;

        if !leftover.is_empty() {
            self.parser.feed(&leftover);
        }
        if self.drain_socket() {
            self.after_read();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DefaultHandler;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn connection_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (server, _) = listener.accept().unwrap();

        let conn = Connection::new(
            Socket::from_std(server).unwrap(),
            Token(7),
            ListenAddr::new("127.0.0.1", 8080),
            Arc::new(Config::default()),
            Arc::new(DefaultHandler),
        );
        (conn, client)
    }

    /// Drives the connection until `done` holds or two seconds pass.
    fn pump(conn: &mut Connection, done: impl Fn(&Connection) -> bool) {
        for _ in 0..200 {
            conn.on_readable();
            conn.on_writable();
            if done(conn) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("connection stuck in {:?}", conn.state());
    }

    fn read_response(client: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0, "server closed before a full response");
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map_or(0, |v| v.trim().parse::<usize>().unwrap());
                if data.len() >= end + 4 + length {
                    return text;
                }
            }
        }
    }

    #[test]
    fn keep_alive_returns_to_awaiting_request() {
        let (mut conn, mut client) = connection_pair();

        client
            .write_all(b"GET /x HTTP/1.1\r\nHost: a\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        pump(&mut conn, |c| {
            c.requests_served() == 1 && c.state() == ConnectionState::AwaitingRequest
        });

        let first = read_response(&mut client);
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.contains("Connection: keep-alive"));
        assert!(!conn.is_closed());

        client
            .write_all(b"GET /y HTTP/1.1\r\nHost: a\r\n\r\n")
            .unwrap();
        pump(&mut conn, |c| c.is_closed());

        let second = read_response(&mut client);
        assert!(second.contains("/y"));
        assert_eq!(conn.close_reason(), Some(CloseReason::Completed));
    }

    #[test]
    fn malformed_request_gets_error_response_then_closes() {
        let (mut conn, mut client) = connection_pair();

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        pump(&mut conn, |c| c.is_closed());

        let response = read_response(&mut client);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Connection: close"));
    }

    #[test]
    fn partial_request_moves_to_receiving() {
        let (mut conn, mut client) = connection_pair();

        client.write_all(b"GET / HT").unwrap();
        pump(&mut conn, |c| c.state() == ConnectionState::Receiving);
    }

    #[test]
    fn peer_close_marks_done_without_error() {
        let (mut conn, client) = connection_pair();
        drop(client);

        pump(&mut conn, |c| c.is_closed());
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
        assert!(!conn.close_reason().unwrap().is_error());
    }

    #[test]
    fn idle_connection_times_out() {
        let (mut conn, _client) = connection_pair();
        let timeout = Duration::from_secs(1);

        assert!(!conn.check_timeout(Instant::now(), timeout));
        assert!(conn.check_timeout(Instant::now() + Duration::from_secs(2), timeout));
        assert_eq!(conn.close_reason(), Some(CloseReason::TimedOut));

        // Already closed: no second teardown
        assert!(!conn.check_timeout(Instant::now() + Duration::from_secs(5), timeout));
    }

    #[test]
    fn pipelined_bytes_are_kept_for_next_request() {
        let (mut conn, mut client) = connection_pair();

        client
            .write_all(
                b"GET /a HTTP/1.1\r\nHost: a\r\nConnection: keep-alive\r\n\r\nGET /b HTTP/1.1\r\nHost: a\r\n\r\n",
            )
            .unwrap();
        pump(&mut conn, |c| c.is_closed());
        assert_eq!(conn.requests_served(), 2);
        drop(conn);

        let mut all = String::new();
        client.read_to_string(&mut all).unwrap();
        assert!(all.contains("/a"));
        assert!(all.contains("/b"));
    }
}
