//! # Tether Client
//!
//! Resilient connection manager for MCP-style tool servers reached over
//! pluggable transports.
//!
//! ## Features
//!
//! - One owned connection with deduplicated, superseding connection attempts
//! - Teardown of the previous session before a new one is opened
//! - Two-strike periodic health checks with self-cancelling timers
//! - Tool errors kept apart from transport errors
//! - Failure budget with periodic, incremental recovery
//! - TTL cache of tools, resources and prompts
//! - Lifecycle events over a broadcast bus
//! - Plugin registry with bundled discovery and a static fallback
//!
//! ## Architecture
//!
//! ```text
//! Caller (CLI, message router)
//!        ↓
//! ConnectionManager ── EventBus ──> subscribers
//!        ↓
//! PluginRegistry → TransportPlugin → TransportSession
//!        ↓
//! tether-http / tether-websocket
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_client::{
//!     ConnectionManager, ConnectionRequest, ManagerConfig, PluginRegistry, RetryPolicy,
//!     TransportType, connect_with_retry,
//! };
//!
//! # async fn example() -> tether_client::TetherResult<()> {
//! let manager = ConnectionManager::new(
//!     ManagerConfig::default(),
//!     Arc::new(PluginRegistry::with_defaults()),
//! )?;
//! manager.init()?;
//!
//! let request = ConnectionRequest::new("ws://localhost:9000/mcp", TransportType::WebSocket);
//! connect_with_retry(&manager, request, &RetryPolicy::default()).await?;
//!
//! for primitive in manager.get_primitives(false).await?.primitives() {
//!     println!("{}: {}", primitive.kind_label(), primitive.name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `http` (default): streamable HTTP and event-stream plugins
//! - `websocket` (default): WebSocket plugin

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

mod cache;
mod config;
mod events;
mod failure;
mod handle;
mod manager;
mod registry;
mod request;
mod retry;

pub use cache::{PrimitivesCache, PrimitivesSnapshot};
pub use config::ManagerConfig;
pub use events::{ConnectionEvent, ConnectionEventKind, EventBus};
pub use failure::FailureRecord;
pub use handle::PluginHandle;
pub use manager::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use registry::{
    BundledDiscovery, LoadReport, PluginDiscovery, PluginRegistry, bundled_factories,
};
pub use request::{ConnectionRequest, ConnectionTarget};
pub use retry::{RetryPolicy, connect_with_retry};

pub use tether_protocol::{
    CallToolResult, ErrorKind, Primitive, TetherError, TetherResult, ToolArguments,
    TransportType,
};
pub use tether_transport_traits::{
    PluginConfig, PluginFactory, PluginMetadata, SessionClose, TransportPlugin, TransportSession,
};
pub use tether_transport_traits::config::{
    AUTH_TOKEN_KEY, HEADERS_KEY, PROTOCOL_VERSION_KEY, REQUEST_TIMEOUT_KEY,
};
