//! WebSocket plugin and channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tether_protocol::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, parse_response,
};
use tether_protocol::{PROTOCOL_VERSION, TetherError, TetherResult, TransportType};
use tether_transport_traits::{
    DEFAULT_REQUEST_TIMEOUT, PendingRequests, PluginConfig, PluginFactory, PluginMetadata,
    RpcChannel, RpcSession, TaskGuard, TransportPlugin, TransportSession,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Upper bound on the close handshake during shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket transport plugin.
#[derive(Debug, Clone)]
pub struct WebSocketPlugin {
    headers: Vec<(HeaderName, HeaderValue)>,
    request_timeout: Duration,
    protocol_version: String,
}

impl WebSocketPlugin {
    /// Create a plugin from its configuration
    pub fn new(config: &PluginConfig) -> TetherResult<Self> {
        let mut headers = Vec::new();
        for (name, value) in config.headers()? {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TetherError::configuration(format!("Invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|e| {
                TetherError::configuration(format!("Invalid value for header '{name}': {e}"))
            })?;
            headers.push((name, value));
        }
        if let Some(token) = config.auth_token()? {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TetherError::configuration(format!("Invalid auth token: {e}")))?;
            headers.push((header::AUTHORIZATION, value));
        }
        Ok(Self {
            headers,
            request_timeout: config.request_timeout()?.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            protocol_version: config
                .protocol_version()?
                .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
        })
    }
}

fn parse_ws_uri(uri: &str) -> TetherResult<Url> {
    let url = Url::parse(uri)
        .map_err(|e| TetherError::configuration(format!("Malformed URI '{uri}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TetherError::configuration(format!(
            "Unsupported scheme '{other}' for WebSocket transport"
        ))),
    }
}

/// Maps a tungstenite failure onto the tagged error type.
pub(crate) fn map_ws_error(err: tungstenite::Error) -> TetherError {
    match err {
        tungstenite::Error::Url(e) => TetherError::configuration(format!("Invalid URL: {e}")),
        tungstenite::Error::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 | 403 => TetherError::configuration(format!(
                    "Server rejected credentials ({status})"
                )),
                404 => TetherError::configuration(format!("Endpoint not found ({status})")),
                _ => TetherError::transport(format!("Upgrade rejected ({status})")),
            }
        }
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TetherError::transport("WebSocket connection closed")
        }
        tungstenite::Error::Io(e) => TetherError::transport(format!("WebSocket IO error: {e}")),
        other => TetherError::transport(format!("WebSocket error: {other}")),
    }
}

#[async_trait]
impl TransportPlugin for WebSocketPlugin {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn is_supported(&self, uri: &str) -> bool {
        parse_ws_uri(uri).is_ok()
    }

    async fn connect(&self, uri: &str) -> TetherResult<Box<dyn TransportSession>> {
        let url = parse_ws_uri(uri)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(map_ws_error)?;
        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        info!(%url, "Opening WebSocket");
        let (stream, _response) = tokio::time::timeout(self.request_timeout, connect_async(request))
            .await
            .map_err(|_| TetherError::timeout("websocket connect", self.request_timeout))?
            .map_err(map_ws_error)?;

        let (sink, source) = stream.split();
        let writer = Arc::new(AsyncMutex::new(sink));
        let pending = Arc::new(PendingRequests::new());
        let open = Arc::new(AtomicBool::new(true));
        let reader = TaskGuard::new(tokio::spawn(read_frames(
            source,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&open),
        )));

        let channel = WebSocketChannel {
            url,
            writer,
            pending,
            open,
            reader: parking_lot::Mutex::new(reader),
        };
        Ok(Box::new(
            RpcSession::new(channel)
                .with_request_timeout(self.request_timeout)
                .with_protocol_version(self.protocol_version.clone()),
        ))
    }
}

/// Single consumer of the socket: routes responses and answers pings.
async fn read_frames(
    mut source: WsSource,
    writer: Arc<AsyncMutex<WsSink>>,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(value) = serde_json::from_str(text.as_str()) else {
                    warn!("Skipping non-JSON text frame");
                    continue;
                };
                match parse_response(value) {
                    Some(response) => {
                        if !pending.resolve(response) {
                            debug!("Dropping response nobody is waiting for");
                        }
                    }
                    None => trace!("Ignoring server-initiated message"),
                }
            }
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = writer.lock().await.send(Message::Pong(data)).await {
                    break format!("Failed to answer ping: {e}");
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => format!("Server closed the connection: {}", &*frame.reason),
                    None => "Server closed the connection".to_string(),
                };
            }
            Some(Ok(_)) => trace!("Ignoring non-text frame"),
            Some(Err(e)) => break format!("WebSocket read failed: {e}"),
            None => break "WebSocket stream ended".to_string(),
        }
    };

    warn!(%reason, "WebSocket closed");
    open.store(false, Ordering::Release);
    pending.fail_all(TetherError::transport(reason));
}

/// JSON-RPC channel over a WebSocket.
pub struct WebSocketChannel {
    url: Url,
    writer: Arc<AsyncMutex<WsSink>>,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
    reader: parking_lot::Mutex<TaskGuard>,
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("url", &self.url.as_str())
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl WebSocketChannel {
    async fn send_text(&self, text: String) -> TetherResult<()> {
        if !self.is_open() {
            return Err(TetherError::transport("WebSocket closed"));
        }
        self.writer
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(map_ws_error)
    }
}

#[async_trait]
impl RpcChannel for WebSocketChannel {
    async fn request(&self, request: JsonRpcRequest) -> TetherResult<JsonRpcResponse> {
        let waiter = self.pending.register(&request.id)?;
        self.send_text(serde_json::to_string(&request)?).await?;
        waiter.recv().await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> TetherResult<()> {
        self.send_text(serde_json::to_string(&notification)?).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.pending.is_closed()
    }

    async fn shutdown(&self) -> TetherResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let closing = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        };
        if tokio::time::timeout(CLOSE_GRACE, closing).await.is_err() {
            debug!(url = %self.url, "Close handshake timed out");
        }
        self.reader.lock().abort();
        self.pending
            .fail_all(TetherError::transport("Session closed"));
        debug!(url = %self.url, "WebSocket session closed");
        Ok(())
    }
}

/// Factory for [`WebSocketPlugin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketFactory;

impl PluginFactory for WebSocketFactory {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            TransportType::WebSocket,
            "websocket",
            env!("CARGO_PKG_VERSION"),
            "JSON-RPC over WebSocket text frames",
            &["ws", "wss"],
        )
    }

    fn create(&self, config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>> {
        Ok(Arc::new(WebSocketPlugin::new(config)?))
    }
}
