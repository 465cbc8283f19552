//! # Tether WebSocket Transport
//!
//! [`WebSocketPlugin`] carries JSON-RPC over WebSocket text frames
//! (`ws://` and `wss://`). A single reader task consumes the socket, routes
//! responses to waiting requests by id and answers pings. When the socket
//! closes, every outstanding request fails with a transport error and the
//! session reports itself unhealthy.
//!
//! Plugin configuration accepts `headers`, `auth_token`,
//! `request_timeout_ms` and `protocol_version`; headers are sent with the
//! upgrade request.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod plugin;

pub use plugin::{WebSocketChannel, WebSocketFactory, WebSocketPlugin};
