//! HTTP protocol implementation.
//!
//! This module implements HTTP/1.0 and HTTP/1.1 framing for a non-blocking
//! server with support for keep-alive connections.
//!
//! # Architecture
//!
//! - **`connection`**: The per-socket state machine driven by readiness events
//! - **`parser`**: Incremental request parser fed with arbitrary byte fragments
//! - **`request`**: HTTP request representation and header helpers
//! - **`response`**: Status codes and the response representation with builder
//! - **`writer`**: Serializes a response once and tracks how much was sent
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Registered for read readiness
//!        └──────┬───────────┘
//!               │ First bytes arrive
//!               ▼
//!        ┌──────────────────┐
//!        │    Receiving     │ ← Parser consumes fragments
//!        └──────┬───────────┘
//!               │ Parser Complete (or Error → error page)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Handler produces the response
//!        └──────┬───────────┘
//!               │ Response materialized
//!               ▼
//!        ┌──────────────────┐
//!        │     Sending      │ ← Read + write readiness, partial writes
//!        └──────┬───────────┘
//!               │ All bytes written
//!               ├─ Keep-Alive → AwaitingRequest (same socket)
//!               └─ Close → Done
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use connection::{CloseReason, Connection, ConnectionState};
pub use parser::{ParseState, RequestParser};
pub use request::{Method, Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};
pub use writer::ResponseWriter;
