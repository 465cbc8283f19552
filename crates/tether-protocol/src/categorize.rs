//! Failure categorization policy.
//!
//! Two disjoint signal sets decide whether a failure is about a single tool
//! call or about the connection. Tool-shaped signals are checked first, and
//! anything matching neither set is treated as tool-shaped so that a one-off
//! remote error never tears down a healthy connection.

use crate::error::ErrorKind;
use crate::jsonrpc;

/// Signals that a single request was rejected while the link stayed healthy.
const TOOL_SHAPED: &[&str] = &[
    "tool not found",
    "unknown tool",
    "no such tool",
    "invalid arguments",
    "invalid argument",
    "invalid params",
    "invalid request",
    "method not found",
    "schema validation",
];

/// Signals that the link itself is unusable.
const CONNECTION_SHAPED: &[&str] = &[
    "connection refused",
    "econnrefused",
    "connection reset",
    "econnreset",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "timed out",
    "timeout",
    "etimedout",
    "name not resolved",
    "name or service not known",
    "enotfound",
    "dns error",
    "failed to lookup address",
    "network error",
    "network unreachable",
    "transport error",
    "stream closed",
    "channel closed",
    "error sending request",
];

/// Categorize an untyped failure message.
///
/// Returns [`ErrorKind::Tool`] or [`ErrorKind::Transport`]; never
/// [`ErrorKind::Timeout`] or [`ErrorKind::Configuration`], which only come
/// from typed sources.
#[must_use]
pub fn categorize_message(message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    if TOOL_SHAPED.iter().any(|signal| lowered.contains(signal)) {
        return ErrorKind::Tool;
    }
    if CONNECTION_SHAPED.iter().any(|signal| lowered.contains(signal)) {
        return ErrorKind::Transport;
    }
    ErrorKind::Tool
}

/// Categorize a JSON-RPC error code, if the code alone is conclusive.
///
/// Standard request-level codes and the MCP "not found" family are
/// tool-shaped. Internal and server-defined codes return `None` so the
/// caller can fall back to [`categorize_message`].
#[must_use]
pub fn categorize_rpc_code(code: i64) -> Option<ErrorKind> {
    match code {
        jsonrpc::PARSE_ERROR
        | jsonrpc::INVALID_REQUEST
        | jsonrpc::METHOD_NOT_FOUND
        | jsonrpc::INVALID_PARAMS
        | jsonrpc::TOOL_NOT_FOUND
        | jsonrpc::PROMPT_NOT_FOUND
        | jsonrpc::RESOURCE_NOT_FOUND => Some(ErrorKind::Tool),
        _ => None,
    }
}
