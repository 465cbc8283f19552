//! # Tether Transport Traits
//!
//! The capability contract every transport plugin satisfies, plus the shared
//! pieces the bundled plugins build on.
//!
//! ## Overview
//!
//! - **Traits**: [`TransportPlugin`], [`TransportSession`], [`SessionClose`], [`PluginFactory`]
//! - **Config**: [`PluginConfig`]
//! - **JSON-RPC layer**: [`RpcChannel`], [`RpcSession`], [`PendingRequests`]
//! - **Tasks**: [`TaskGuard`]
//!
//! ## Usage
//!
//! A wire plugin implements [`RpcChannel`] and wraps it in an [`RpcSession`]:
//!
//! ```rust,ignore
//! use tether_transport_traits::{RpcChannel, RpcSession, TransportSession};
//!
//! #[derive(Debug)]
//! struct MyChannel { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl RpcChannel for MyChannel {
//!     // request / notify / shutdown
//! }
//!
//! let session: Box<dyn TransportSession> = Box::new(RpcSession::new(MyChannel { /* ... */ }));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod config;
mod plugin;
mod rpc;
mod task;

pub use config::PluginConfig;
pub use plugin::{PluginFactory, PluginMetadata, SessionClose, TransportPlugin, TransportSession};
pub use rpc::{
    CLIENT_NAME, DEFAULT_REQUEST_TIMEOUT, PendingRequests, ResponseWaiter, RpcChannel, RpcSession,
};
pub use task::TaskGuard;

// Re-export the protocol vocabulary so plugins need a single dependency
pub use tether_protocol::{
    CallToolResult, ErrorKind, InitializeResult, Primitive, TetherError, TetherResult,
    ToolArguments, TransportType,
};
