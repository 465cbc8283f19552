//! Legacy HTTP + Server-Sent Events plugin.
//!
//! A `GET` opens a long-lived event stream. Its first `endpoint` event names
//! the URL requests are `POST`ed to; responses come back as `message` events
//! on the stream and are routed to their waiters by id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tether_protocol::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, parse_response,
};
use tether_protocol::{TetherError, TetherResult, TransportType};
use tether_transport_traits::{
    PendingRequests, PluginConfig, PluginFactory, PluginMetadata, RpcChannel, RpcSession,
    TaskGuard, TransportPlugin, TransportSession,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::settings::{HttpSettings, is_http_uri, map_reqwest_error, parse_http_uri, status_error};
use crate::sse::SseParser;

/// Event-stream (legacy SSE) transport plugin.
#[derive(Debug)]
pub struct SsePlugin {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl SsePlugin {
    /// Create a plugin from its configuration
    pub fn new(config: &PluginConfig) -> TetherResult<Self> {
        let settings = HttpSettings::from_config(config)?;
        let client = settings.build_client()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl TransportPlugin for SsePlugin {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn is_supported(&self, uri: &str) -> bool {
        is_http_uri(uri)
    }

    async fn connect(&self, uri: &str) -> TetherResult<Box<dyn TransportSession>> {
        let stream_url = parse_http_uri(uri)?;
        let bound = self.settings.request_timeout;
        info!(%stream_url, "Opening event stream");

        let response = self
            .client
            .get(stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, "open event stream", bound))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, false));
        }

        let pending = Arc::new(PendingRequests::new());
        let open = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        // Dropping the guard on any early return below tears the stream down.
        let reader = TaskGuard::new(tokio::spawn(read_stream(
            response,
            stream_url.clone(),
            Arc::clone(&pending),
            Arc::clone(&open),
            endpoint_tx,
        )));

        let endpoint = match tokio::time::timeout(bound, endpoint_rx).await {
            Ok(Ok(resolved)) => resolved?,
            Ok(Err(_)) => {
                return Err(TetherError::transport(
                    "Event stream closed before announcing an endpoint",
                ));
            }
            Err(_) => return Err(TetherError::timeout("endpoint discovery", bound)),
        };
        info!(%endpoint, "Discovered message endpoint");

        let channel = SseChannel {
            client: self.client.clone(),
            endpoint,
            request_timeout: bound,
            pending,
            open,
            reader: Mutex::new(reader),
        };
        Ok(Box::new(
            RpcSession::new(channel)
                .with_request_timeout(bound)
                .with_protocol_version(self.settings.protocol_version.clone()),
        ))
    }
}

async fn read_stream(
    response: reqwest::Response,
    stream_url: Url,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
    endpoint_tx: oneshot::Sender<TetherResult<Url>>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    let reason = loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                for event in parser.push(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => match endpoint_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(resolve_endpoint(&stream_url, &event.data));
                            }
                            None => debug!("Ignoring repeated endpoint event"),
                        },
                        "message" => match event.json().and_then(parse_response) {
                            Some(response) => {
                                if !pending.resolve(response) {
                                    debug!("Dropping response nobody is waiting for");
                                }
                            }
                            None => debug!("Ignoring server-initiated message"),
                        },
                        other => debug!(event = other, "Ignoring event"),
                    }
                }
            }
            Some(Err(e)) => break format!("Event stream failed: {e}"),
            None => break "Event stream ended".to_string(),
        }
    };

    warn!(%stream_url, %reason, "Event stream closed");
    open.store(false, Ordering::Release);
    pending.fail_all(TetherError::transport(reason));
}

/// Resolves the `endpoint` event payload against the stream URL.
///
/// The payload is either a bare (possibly relative) URL or a JSON object
/// with a `uri` field.
fn resolve_endpoint(stream_url: &Url, data: &str) -> TetherResult<Url> {
    let data = data.trim();
    let raw = if data.starts_with('{') {
        let value: Value = serde_json::from_str(data)?;
        value
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TetherError::transport("Endpoint event is missing 'uri'"))?
    } else {
        data.to_string()
    };
    stream_url
        .join(&raw)
        .map_err(|e| TetherError::transport(format!("Invalid endpoint '{raw}': {e}")))
}

/// JSON-RPC channel over an event stream plus `POST`ed requests.
#[derive(Debug)]
pub struct SseChannel {
    client: reqwest::Client,
    endpoint: Url,
    request_timeout: Duration,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
    reader: Mutex<TaskGuard>,
}

impl SseChannel {
    /// Endpoint requests are posted to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn post<T: Serialize + Sync>(
        &self,
        body: &T,
        operation: &str,
    ) -> TetherResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, operation, self.request_timeout))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, true))
    }

    fn ensure_open(&self) -> TetherResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TetherError::transport("Event stream closed"))
        }
    }
}

/// Some servers answer the `POST` directly instead of on the stream.
async fn direct_response(response: reqwest::Response, id: &RequestId) -> Option<JsonRpcResponse> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    if !is_json {
        return None;
    }
    let value: Value = response.json().await.ok()?;
    parse_response(value)
        .filter(|r| r.id.as_ref().map(ToString::to_string) == Some(id.to_string()))
}

#[async_trait]
impl RpcChannel for SseChannel {
    async fn request(&self, request: JsonRpcRequest) -> TetherResult<JsonRpcResponse> {
        self.ensure_open()?;
        let waiter = self.pending.register(&request.id)?;
        let response = self.post(&request, &request.method).await?;
        if let Some(direct) = direct_response(response, &request.id).await {
            return Ok(direct);
        }
        waiter.recv().await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> TetherResult<()> {
        self.ensure_open()?;
        self.post(&notification, &notification.method).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.pending.is_closed()
    }

    async fn shutdown(&self) -> TetherResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.reader.lock().abort();
        self.pending
            .fail_all(TetherError::transport("Session closed"));
        debug!(endpoint = %self.endpoint, "Event stream session closed");
        Ok(())
    }
}

/// Factory for [`SsePlugin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SseFactory;

impl PluginFactory for SseFactory {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            TransportType::Sse,
            "sse",
            env!("CARGO_PKG_VERSION"),
            "HTTP + Server-Sent Events: GET stream, POST requests",
            &["http", "https"],
        )
    }

    fn create(&self, config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>> {
        Ok(Arc::new(SsePlugin::new(config)?))
    }
}
