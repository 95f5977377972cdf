//! Readiness-driven connection multiplexer.
//!
//! One thread owns the [`EventLoop`]: every listener and every client socket
//! is registered with a single `mio::Poll`, and each iteration
//!
//! 1. waits for readiness (bounded by the configured poll interval),
//! 2. accepts every pending connection on ready listeners,
//! 3. dispatches read then write handling to ready connections,
//! 4. closes connections idle past the timeout,
//! 5. re-registers interest (write interest only while a response is
//!    pending) and tears down every connection marked done.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use mio::{Events, Poll, Token, Waker};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::handler::Handler;
use crate::http::connection::{CloseReason, Connection};
use crate::server::listener::{ListenAddr, Listener};

const WAKER: Token = Token(usize::MAX);
const MAX_EVENTS: usize = 1024;

/// Stops a running [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    listeners: Vec<Listener>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    shutdown: ShutdownHandle,
}

impl EventLoop {
    /// Binds every configured address. Listener `i` uses `Token(i)`;
    /// connections are numbered after the listeners.
    pub fn bind(config: Config, handler: impl Handler + 'static) -> anyhow::Result<Self> {
        let poll = Poll::new().context("Failed to create poll instance")?;
        let waker = Waker::new(poll.registry(), WAKER).context("Failed to create waker")?;

        let mut listeners = Vec::new();
        for (index, (host, port)) in config.listen_addrs().into_iter().enumerate() {
            let mut listener = Listener::bind(ListenAddr::new(host, port))?;
            listener
                .register(poll.registry(), Token(index))
                .with_context(|| format!("Failed to register listener {}", listener.addr()))?;
            listeners.push(listener);
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            next_token: listeners.len(),
            listeners,
            connections: HashMap::new(),
            config: Arc::new(config),
            handler: Arc::new(handler),
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, token: Token) -> Option<&Connection> {
        self.connections.get(&token)
    }

    /// Runs until the shutdown handle fires or waiting for events fails.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!(
            listeners = self.listeners.len(),
            idle_timeout = ?self.config.idle_timeout(),
            "Event loop started"
        );

        let interval = self.config.poll_interval();
        while !self.shutdown.is_shutdown() {
            self.run_once(Some(interval))?;
        }

        self.close_all();
        info!("Event loop stopped");
        Ok(())
    }

    /// One wait-dispatch-sweep iteration.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> anyhow::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e).context("Failed to wait for readiness events"),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                let writable = event.is_writable() || event.is_write_closed();
                (event.token(), readable, writable)
            })
            .collect();

        for (token, readable, writable) in ready {
            if token == WAKER {
                continue;
            }
            if token.0 < self.listeners.len() {
                self.accept_connections(token.0);
                continue;
            }
            let Some(conn) = self.connections.get_mut(&token) else {
                continue;
            };
            if readable {
                conn.on_readable();
            }
            if writable || conn.wants_write() {
                conn.on_writable();
            }
        }

        self.sweep_timeouts(Instant::now());
        self.sync_and_reap();
        Ok(())
    }

    fn accept_connections(&mut self, index: usize) {
        let listener = &self.listeners[index];
        loop {
            let socket = match listener.accept() {
                Ok(Some(socket)) => socket,
                Ok(None) => break,
                Err(e) => {
                    warn!(listen = %listener.addr(), error = %e, "Accept failed");
                    break;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;
            let peer = socket.peer_addr();

            let mut conn = Connection::new(
                socket,
                token,
                listener.addr().clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.handler),
            );
            if let Err(e) = conn.sync_registration(self.poll.registry()) {
                warn!(token = token.0, %peer, error = %e, "Failed to register connection");
                continue;
            }

            info!(token = token.0, %peer, listen = %listener.addr(), "Accepted connection");
            self.connections.insert(token, conn);
        }
    }

    fn sweep_timeouts(&mut self, now: Instant) {
        let timeout = self.config.idle_timeout();
        for conn in self.connections.values_mut() {
            conn.check_timeout(now, timeout);
        }
    }

    fn sync_and_reap(&mut self) {
        let registry = self.poll.registry();
        for conn in self.connections.values_mut() {
            if conn.is_closed() {
                continue;
            }
            if let Err(e) = conn.sync_registration(registry) {
                warn!(token = conn.token().0, error = %e, "Failed to update interest");
                conn.close(CloseReason::IoError);
            }
        }

        let done: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_closed())
            .map(|(token, _)| *token)
            .collect();
        for token in done {
            self.teardown(token);
        }
    }

    /// Deregisters and drops the connection, closing its socket. Unknown
    /// tokens are ignored.
    pub fn teardown(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        conn.deregister(self.poll.registry());
        debug!(
            token = token.0,
            reason = ?conn.close_reason(),
            served = conn.requests_served(),
            "Connection removed"
        );
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.close(CloseReason::Shutdown);
            }
            self.teardown(token);
        }

        let registry = self.poll.registry();
        for listener in &mut self.listeners {
            if let Err(e) = listener.deregister(registry) {
                debug!(listen = %listener.addr(), error = %e, "Failed to deregister listener");
            }
        }
    }
}
