//! # Tether Protocol
//!
//! Shared vocabulary for the tether connection manager and its transport
//! plugins:
//!
//! - **Errors**: [`TetherError`], [`ErrorKind`], [`TetherResult`]
//! - **Categorization**: the tool-shaped vs connection-shaped policy in [`categorize`]
//! - **JSON-RPC**: request/response envelopes in [`jsonrpc`]
//! - **Types**: [`TransportType`], [`Primitive`], [`CallToolResult`], handshake types

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod categorize;
mod error;
pub mod jsonrpc;
mod types;

pub use error::{ErrorKind, TetherError, TetherResult};
pub use types::{
    CallToolResult, InitializeResult, PROTOCOL_VERSION, Primitive, PromptArgument,
    PromptPrimitive, ResourcePrimitive, ServerCapabilities, ServerInfo, ToolArguments,
    ToolPrimitive, TransportType,
};
