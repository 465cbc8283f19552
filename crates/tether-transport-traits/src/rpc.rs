//! Generic MCP method layer over any JSON-RPC channel.
//!
//! Wire plugins only move JSON-RPC envelopes; [`RpcSession`] implements the
//! handshake, tool calls, primitive listing and probes once for all of them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tether_protocol::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, RequestId,
};
use tether_protocol::{
    CallToolResult, InitializeResult, PROTOCOL_VERSION, Primitive, PromptPrimitive,
    ResourcePrimitive, ServerCapabilities, TetherError, TetherResult, ToolArguments,
    ToolPrimitive,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::plugin::{SessionClose, TransportSession};

/// Client name sent in `clientInfo`.
pub const CLIENT_NAME: &str = "tether";

/// Default per-request bound when the plugin config does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on followed pagination cursors per category.
const MAX_PAGES: usize = 64;

/// A bidirectional JSON-RPC channel provided by a wire plugin.
#[async_trait]
pub trait RpcChannel: Send + Sync + fmt::Debug {
    /// Sends a request and waits for its correlated response.
    async fn request(&self, request: JsonRpcRequest) -> TetherResult<JsonRpcResponse>;

    /// Sends a notification; no response is expected.
    async fn notify(&self, notification: JsonRpcNotification) -> TetherResult<()>;

    /// Returns `false` once the channel is known to be unusable.
    fn is_open(&self) -> bool {
        true
    }

    /// Called after a successful handshake with the agreed protocol revision.
    fn negotiated(&self, _protocol_version: &str) {}

    /// Releases the channel. Must tolerate being called twice.
    async fn shutdown(&self) -> TetherResult<()>;
}

/// MCP session over an [`RpcChannel`].
pub struct RpcSession<C> {
    channel: C,
    next_id: AtomicU64,
    request_timeout: Duration,
    protocol_version: String,
    capabilities: RwLock<Option<ServerCapabilities>>,
    closed: AtomicBool,
}

impl<C: fmt::Debug> fmt::Debug for RpcSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSession")
            .field("channel", &self.channel)
            .field("request_timeout", &self.request_timeout)
            .field("protocol_version", &self.protocol_version)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: RpcChannel> RpcSession<C> {
    /// Wrap a channel with default timeout and protocol revision
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Override the per-request bound
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the protocol revision sent during the handshake
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Access the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Capabilities recorded by the last successful handshake
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().clone()
    }

    /// Sends one request bounded by the session's request timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> TetherResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TetherError::transport("Session closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "Sending request");
        let request = JsonRpcRequest::new(id, method, params);
        let response = tokio::time::timeout(self.request_timeout, self.channel.request(request))
            .await
            .map_err(|_| TetherError::timeout(method, self.request_timeout))??;
        response.into_result()
    }

    async fn list_paginated(
        &self,
        method: &str,
        field: &str,
        tolerate_missing: bool,
    ) -> TetherResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = match self.request(method, params).await {
                Ok(result) => result,
                Err(TetherError::Tool {
                    code: Some(METHOD_NOT_FOUND),
                    ..
                }) if tolerate_missing => {
                    debug!(method, "Server does not implement listing method");
                    return Ok(items);
                }
                Err(e) => return Err(e),
            };
            if let Some(Value::Array(page)) = result.get(field) {
                items.extend(page.iter().cloned());
            }
            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(items),
            }
        }
        warn!(method, pages = MAX_PAGES, "Stopped following pagination cursors");
        Ok(items)
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(
    items: Vec<Value>,
    wrap: fn(T) -> Primitive,
) -> TetherResult<Vec<Primitive>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map(wrap).map_err(TetherError::from))
        .collect()
}

#[async_trait]
impl<C: RpcChannel> TransportSession for RpcSession<C> {
    async fn handshake(&self) -> TetherResult<InitializeResult> {
        let params = json!({
            "protocolVersion": self.protocol_version,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result: InitializeResult =
            serde_json::from_value(self.request("initialize", Some(params)).await?)?;
        *self.capabilities.write() = Some(result.capabilities.clone());
        self.channel.negotiated(&result.protocol_version);
        self.channel
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "Handshake completed"
        );
        Ok(result)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> TetherResult<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_primitives(&self) -> TetherResult<Vec<Primitive>> {
        let caps = self.capabilities();
        // Without a recorded handshake every category is tried and a missing
        // listing method counts as an empty category.
        let (tools, resources, prompts, tolerate) = match &caps {
            Some(c) => (
                c.tools.is_some(),
                c.resources.is_some(),
                c.prompts.is_some(),
                false,
            ),
            None => (true, true, true, true),
        };

        let mut primitives = Vec::new();
        if tools {
            let items = self.list_paginated("tools/list", "tools", tolerate).await?;
            primitives.extend(decode_all::<ToolPrimitive>(items, Primitive::Tool)?);
        }
        if resources {
            let items = self
                .list_paginated("resources/list", "resources", tolerate)
                .await?;
            primitives.extend(decode_all::<ResourcePrimitive>(items, Primitive::Resource)?);
        }
        if prompts {
            let items = self
                .list_paginated("prompts/list", "prompts", tolerate)
                .await?;
            primitives.extend(decode_all::<PromptPrimitive>(items, Primitive::Prompt)?);
        }
        debug!(count = primitives.len(), "Listed primitives");
        Ok(primitives)
    }

    async fn is_healthy(&self) -> bool {
        if self.closed.load(Ordering::Acquire) || !self.channel.is_open() {
            return false;
        }
        answered(self.request("ping", None).await, "ping")
    }

    async fn probe(&self) -> bool {
        let caps = self.capabilities().unwrap_or_default();
        let method = if caps.resources.is_some() {
            "resources/list"
        } else if caps.tools.is_some() {
            "tools/list"
        } else {
            "ping"
        };
        answered(self.request(method, None).await, method)
    }

    fn closer(&self) -> Option<&dyn SessionClose> {
        Some(self)
    }
}

/// A tool-shaped error still proves the remote end answered.
fn answered(result: TetherResult<Value>, method: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) if !e.is_connection_shaped() => true,
        Err(e) => {
            debug!(method, error = %e, "Probe failed");
            false
        }
    }
}

#[async_trait]
impl<C: RpcChannel> SessionClose for RpcSession<C> {
    async fn close(&self) -> TetherResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.channel.shutdown().await
    }
}

type Waiters = HashMap<String, oneshot::Sender<TetherResult<JsonRpcResponse>>>;

#[derive(Debug, Default)]
struct PendingInner {
    waiters: Waiters,
    closed: Option<TetherError>,
}

/// Correlates responses arriving on a reader task with waiting requests.
///
/// Ids are compared by their display form so a server echoing `1` as `"1"`
/// is still routed.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<PendingInner>,
}

impl PendingRequests {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`.
    ///
    /// Fails with the closing error once [`fail_all`](Self::fail_all) ran.
    pub fn register(&self, id: &RequestId) -> TetherResult<ResponseWaiter<'_>> {
        let (tx, rx) = oneshot::channel();
        let key = id.to_string();
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.closed {
            return Err(err.clone());
        }
        inner.waiters.insert(key.clone(), tx);
        Ok(ResponseWaiter {
            pending: self,
            key,
            rx: Some(rx),
        })
    }

    /// Delivers a response to its waiter. Returns `false` if nobody waits for it.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = &response.id else {
            return false;
        };
        let sender = self.inner.lock().waiters.remove(&id.to_string());
        match sender {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Fails every waiter with `error` and rejects future registrations.
    pub fn fail_all(&self, error: TetherError) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = Some(error.clone());
            inner.waiters.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of requests still waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Returns `true` if no request is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`fail_all`](Self::fail_all) ran
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    fn forget(&self, key: &str) {
        self.inner.lock().waiters.remove(key);
    }
}

/// Pending response slot. Dropping it unregisters the request.
#[derive(Debug)]
pub struct ResponseWaiter<'a> {
    pending: &'a PendingRequests,
    key: String,
    rx: Option<oneshot::Receiver<TetherResult<JsonRpcResponse>>>,
}

impl ResponseWaiter<'_> {
    /// Waits for the correlated response.
    pub async fn recv(mut self) -> TetherResult<JsonRpcResponse> {
        let Some(rx) = self.rx.take() else {
            return Err(TetherError::transport("Response channel closed"));
        };
        rx.await
            .unwrap_or_else(|_| Err(TetherError::transport("Response channel closed")))
    }
}

impl Drop for ResponseWaiter<'_> {
    fn drop(&mut self) {
        self.pending.forget(&self.key);
    }
}
