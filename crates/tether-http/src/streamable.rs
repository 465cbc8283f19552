//! Streamable HTTP plugin.
//!
//! Every request is a `POST` to the endpoint. The server answers with either
//! a JSON body or an event stream carrying the response. The session id the
//! server hands out is echoed on later requests and released with `DELETE`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tether_protocol::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR, RequestId, parse_response,
};
use tether_protocol::{TetherError, TetherResult, TransportType};
use tether_transport_traits::{
    PluginConfig, PluginFactory, PluginMetadata, RpcChannel, RpcSession, TransportPlugin,
    TransportSession,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::settings::{
    HttpSettings, PROTOCOL_HEADER, SESSION_HEADER, is_http_uri, map_reqwest_error,
    parse_http_uri, status_error,
};
use crate::sse::SseParser;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Streamable HTTP transport plugin.
#[derive(Debug)]
pub struct StreamableHttpPlugin {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl StreamableHttpPlugin {
    /// Create a plugin from its configuration
    pub fn new(config: &PluginConfig) -> TetherResult<Self> {
        let settings = HttpSettings::from_config(config)?;
        let client = settings.build_client()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl TransportPlugin for StreamableHttpPlugin {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn is_supported(&self, uri: &str) -> bool {
        is_http_uri(uri)
    }

    async fn connect(&self, uri: &str) -> TetherResult<Box<dyn TransportSession>> {
        let endpoint = parse_http_uri(uri)?;
        info!(%endpoint, "Opening streamable HTTP session");
        let channel = StreamableHttpChannel {
            client: self.client.clone(),
            endpoint,
            request_timeout: self.settings.request_timeout,
            session_id: RwLock::new(None),
            negotiated: RwLock::new(None),
            open: AtomicBool::new(true),
        };
        Ok(Box::new(
            RpcSession::new(channel)
                .with_request_timeout(self.settings.request_timeout)
                .with_protocol_version(self.settings.protocol_version.clone()),
        ))
    }
}

/// JSON-RPC channel over streamable HTTP.
#[derive(Debug)]
pub struct StreamableHttpChannel {
    client: reqwest::Client,
    endpoint: Url,
    request_timeout: Duration,
    session_id: RwLock<Option<String>>,
    negotiated: RwLock<Option<String>>,
    open: AtomicBool,
}

impl StreamableHttpChannel {
    /// Session id assigned by the server, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn post<T: Serialize + Sync>(
        &self,
        body: &T,
        operation: &str,
    ) -> TetherResult<reqwest::Response> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TetherError::transport("Session closed"));
        }
        let session_id = self.session_id();
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.request_timeout)
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        if let Some(session_id) = &session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        let negotiated = self.negotiated.read().clone();
        if let Some(version) = negotiated {
            builder = builder.header(PROTOCOL_HEADER, version);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, operation, self.request_timeout))?;

        if let Some(assigned) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(assigned.to_string());
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY)
            && let Some(err) = rpc_error_body(&body)
        {
            return Err(err);
        }
        if status == StatusCode::NOT_FOUND && session_id.is_some() {
            warn!(endpoint = %self.endpoint, "Server no longer recognizes the session");
            self.open.store(false, Ordering::Release);
        }
        Err(status_error(status, &body, session_id.is_some()))
    }

    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: &RequestId,
        method: &str,
    ) -> TetherResult<JsonRpcResponse> {
        let wanted = id.to_string();
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(&e, method, self.request_timeout))?;
            for event in parser.push(&chunk) {
                if event.event != "message" {
                    continue;
                }
                let Some(value) = event.json() else {
                    warn!(method, "Skipping event with non-JSON data");
                    continue;
                };
                match parse_response(value) {
                    Some(response) if response.id.as_ref().map(ToString::to_string).as_deref()
                        == Some(wanted.as_str()) =>
                    {
                        return Ok(response);
                    }
                    Some(_) => debug!(method, "Ignoring response for another request"),
                    None => debug!(method, "Ignoring server-initiated message"),
                }
            }
        }
        Err(TetherError::transport(format!(
            "Event stream ended before the response to '{method}'"
        )))
    }
}

fn rpc_error_body(body: &str) -> Option<TetherError> {
    let value: Value = serde_json::from_str(body).ok()?;
    let response = parse_response(value)?;
    response.into_result().err()
}

fn not_a_response(method: &str) -> TetherError {
    TetherError::Tool {
        code: Some(PARSE_ERROR),
        message: format!("Server reply to '{method}' is not a JSON-RPC response"),
    }
}

#[async_trait]
impl RpcChannel for StreamableHttpChannel {
    async fn request(&self, request: JsonRpcRequest) -> TetherResult<JsonRpcResponse> {
        let response = self.post(&request, &request.method).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Err(TetherError::tool(format!(
                "Server accepted '{}' without returning a response",
                request.method
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if content_type.contains("text/event-stream") {
            return self
                .read_event_stream(response, &request.id, &request.method)
                .await;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&e, &request.method, self.request_timeout))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        let wanted = request.id.to_string();
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(parse_response)
                .find(|r| r.id.as_ref().map(ToString::to_string).as_deref() == Some(wanted.as_str()))
                .ok_or_else(|| not_a_response(&request.method)),
            value => parse_response(value).ok_or_else(|| not_a_response(&request.method)),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> TetherResult<()> {
        self.post(&notification, &notification.method).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn negotiated(&self, protocol_version: &str) {
        *self.negotiated.write() = Some(protocol_version.to_string());
    }

    async fn shutdown(&self) -> TetherResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };
        let result = self
            .client
            .delete(self.endpoint.clone())
            .timeout(self.request_timeout)
            .header(SESSION_HEADER, session_id)
            .send()
            .await;
        match result {
            Ok(response) => debug!(status = %response.status(), "Session terminated"),
            Err(e) => debug!(error = %e, "Session termination failed; ignoring"),
        }
        Ok(())
    }
}

/// Factory for [`StreamableHttpPlugin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamableHttpFactory;

impl PluginFactory for StreamableHttpFactory {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            TransportType::StreamableHttp,
            "streamable-http",
            env!("CARGO_PKG_VERSION"),
            "Streamable HTTP: POST per request, JSON or event-stream replies",
            &["http", "https"],
        )
    }

    fn create(&self, config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>> {
        Ok(Arc::new(StreamableHttpPlugin::new(config)?))
    }
}
