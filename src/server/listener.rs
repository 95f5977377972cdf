use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use tracing::info;

use crate::server::socket::Socket;

/// A `host:port` pair as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl ListenAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Non-blocking listening socket.
pub struct Listener {
    inner: TcpListener,
    addr: ListenAddr,
    local: SocketAddr,
}

impl Listener {
    pub fn bind(addr: ListenAddr) -> anyhow::Result<Self> {
        let resolved = (addr.host.as_str(), addr.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {addr}"))?
            .next()
            .with_context(|| format!("No address found for {addr}"))?;

        let inner =
            TcpListener::bind(resolved).with_context(|| format!("Failed to bind {addr}"))?;
        let local = inner.local_addr()?;
        info!("Listening on {} ({})", addr, local);

        Ok(Self { inner, addr, local })
    }

    /// Address from the configuration.
    pub fn addr(&self) -> &ListenAddr {
        &self.addr
    }

    /// Address actually bound, which differs from the configured one for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.inner, token, Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.inner)
    }

    /// Accepts one pending connection, `None` once the backlog is empty.
    pub fn accept(&self) -> io::Result<Option<Socket>> {
        loop {
            return match self.inner.accept() {
                Ok((stream, peer)) => Ok(Some(Socket::new(stream, peer))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }
}
