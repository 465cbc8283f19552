//! # Tether HTTP Transports
//!
//! Two transport plugins over HTTP:
//!
//! - [`StreamableHttpPlugin`]: one `POST` per request, answered with JSON or an
//!   event stream; `Mcp-Session-Id` tracking; session release with `DELETE`.
//! - [`SsePlugin`]: legacy HTTP + Server-Sent Events. A `GET` stream announces
//!   the message endpoint and carries responses back.
//!
//! Both build on [`tether_transport_traits::RpcSession`], so the handshake,
//! tool calls and primitive listing behave identically.
//!
//! ## Plugin configuration
//!
//! | key | type | effect |
//! |---|---|---|
//! | `headers` | object of strings | extra headers on every request |
//! | `auth_token` | string | `Authorization: Bearer <token>` |
//! | `request_timeout_ms` | integer | per-request bound (default 30 s) |
//! | `protocol_version` | string | revision offered during the handshake |
//!
//! ## Status mapping
//!
//! 401/403 are configuration errors. 404 is a transport error once a session
//! exists and a configuration error otherwise. 408, 429 and 5xx are transport
//! errors. Any other rejection is a tool error.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod event_stream;
mod settings;
pub mod sse;
mod streamable;

pub use event_stream::{SseChannel, SseFactory, SsePlugin};
pub use settings::{PROTOCOL_HEADER, SESSION_HEADER};
pub use streamable::{StreamableHttpChannel, StreamableHttpFactory, StreamableHttpPlugin};
