//! Non-blocking client socket.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Result of one non-blocking read or write.
#[derive(Debug)]
pub enum IoOutcome {
    Transferred(usize),
    WouldBlock,
    PeerClosed,
    Fatal(io::Error),
}

/// Owns one accepted connection. The descriptor is closed on drop.
#[derive(Debug)]
pub struct Socket {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Socket {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Wraps a connected std stream, switching it to non-blocking mode.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(true)?;
        Ok(Self::new(TcpStream::from_std(stream), peer))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn read(&mut self, buf: &mut [u8]) -> IoOutcome {
        loop {
            return match self.stream.read(buf) {
                Ok(0) => IoOutcome::PeerClosed,
                Ok(n) => IoOutcome::Transferred(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => IoOutcome::Fatal(e),
            };
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> IoOutcome {
        loop {
            return match self.stream.write(buf) {
                Ok(0) if !buf.is_empty() => IoOutcome::PeerClosed,
                Ok(n) => IoOutcome::Transferred(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => IoOutcome::Fatal(e),
            };
        }
    }

    pub fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, token, interest)
    }

    pub fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.reregister(&mut self.stream, token, interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
