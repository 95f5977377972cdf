//! webserv - single-threaded HTTP/1.x server
//!
//! Core library: incremental request parsing, response assembly with
//! partial-write tracking, per-connection state machines and the readiness
//! event loop that drives them.

pub mod config;
pub mod handler;
pub mod http;
pub mod server;
