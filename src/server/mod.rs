//! Listening sockets, client sockets and the event loop that multiplexes them.

pub mod event_loop;
pub mod listener;
pub mod socket;

pub use event_loop::{EventLoop, ShutdownHandle};
pub use listener::{ListenAddr, Listener};
pub use socket::{IoOutcome, Socket};
