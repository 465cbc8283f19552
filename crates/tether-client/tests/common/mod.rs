//! Scripted in-memory transport plugin shared by the integration tests.
//!
//! Counts connects, live sessions and the peak number of sessions alive at
//! once, and can be flipped between reachable/unreachable and
//! healthy/unhealthy while tests run. Connect and close can be made to hang
//! forever.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tether_client::{
    ConnectionManager, ConnectionRequest, ManagerConfig, PluginConfig, PluginFactory,
    PluginMetadata, PluginRegistry, SessionClose, TetherError, TetherResult, ToolArguments,
    TransportPlugin, TransportSession, TransportType,
};
use tether_protocol::{
    CallToolResult, InitializeResult, Primitive, ResourcePrimitive, ServerCapabilities,
    ServerInfo, ToolPrimitive,
};

pub const TRANSPORT: TransportType = TransportType::StreamableHttp;

/// Knobs and counters shared by the factory, plugin and sessions.
#[derive(Debug)]
pub struct MockServer {
    pub connects: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub closes: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub health_checks: AtomicUsize,
    pub tool_calls: AtomicUsize,
    reachable: AtomicBool,
    healthy: AtomicBool,
    drop_calls: AtomicBool,
    connect_hangs: AtomicBool,
    close_hangs: AtomicBool,
    connect_delay_ms: AtomicU64,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            peak_live: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            drop_calls: AtomicBool::new(false),
            connect_hangs: AtomicBool::new(false),
            close_hangs: AtomicBool::new(false),
            connect_delay_ms: AtomicU64::new(0),
        }
    }
}

impl MockServer {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Tool calls fail with a transport error while set.
    pub fn set_drop_calls(&self, drop_calls: bool) {
        self.drop_calls.store(drop_calls, Ordering::SeqCst);
    }

    /// `connect` never returns while set.
    pub fn set_connect_hangs(&self, hangs: bool) {
        self.connect_hangs.store(hangs, Ordering::SeqCst);
    }

    /// `close` never returns while set. The session is still released when
    /// the manager drops it.
    pub fn set_close_hangs(&self, hangs: bool) {
        self.close_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn open(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockFactory {
    server: Arc<MockServer>,
}

impl PluginFactory for MockFactory {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(TRANSPORT, "mock", "0.0.0", "scripted test transport", &["mock"])
    }

    fn create(&self, _config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>> {
        Ok(Arc::new(MockPlugin {
            server: Arc::clone(&self.server),
        }))
    }
}

#[derive(Debug)]
pub struct MockPlugin {
    server: Arc<MockServer>,
}

#[async_trait]
impl TransportPlugin for MockPlugin {
    fn transport_type(&self) -> TransportType {
        TRANSPORT
    }

    fn is_supported(&self, uri: &str) -> bool {
        uri.starts_with("mock://")
    }

    async fn connect(&self, _uri: &str) -> TetherResult<Box<dyn TransportSession>> {
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        if self.server.connect_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.server.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.server.reachable.load(Ordering::SeqCst) {
            return Err(TetherError::transport("connection refused"));
        }
        self.server.open();
        Ok(Box::new(MockSession {
            server: Arc::clone(&self.server),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
pub struct MockSession {
    server: Arc<MockServer>,
    closed: AtomicBool,
}

impl MockSession {
    fn ensure_open(&self) -> TetherResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TetherError::transport("session closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn handshake(&self) -> TetherResult<InitializeResult> {
        self.ensure_open()?;
        Ok(InitializeResult {
            protocol_version: "2025-06-18".into(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                resources: Some(json!({})),
                prompts: None,
            },
            server_info: ServerInfo {
                name: "mock".into(),
                version: "0.0.0".into(),
            },
            instructions: None,
        })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> TetherResult<CallToolResult> {
        self.ensure_open()?;
        self.server.tool_calls.fetch_add(1, Ordering::SeqCst);
        if self.server.drop_calls.load(Ordering::SeqCst) {
            return Err(TetherError::transport("connection reset by peer"));
        }
        match name {
            "echo" => Ok(CallToolResult {
                content: vec![json!({
                    "type": "text",
                    "text": arguments.get("text").and_then(|v| v.as_str()).unwrap_or_default()
                })],
                is_error: false,
                structured_content: None,
            }),
            other => Err(TetherError::Tool {
                code: Some(-32602),
                message: format!("Unknown tool: {other}"),
            }),
        }
    }

    async fn list_primitives(&self) -> TetherResult<Vec<Primitive>> {
        self.ensure_open()?;
        self.server.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Primitive::Tool(ToolPrimitive {
                name: "echo".into(),
                description: Some("Echo text back".into()),
                input_schema: json!({"type": "object"}),
            }),
            Primitive::Resource(ResourcePrimitive {
                name: "readme".into(),
                description: None,
                uri: "file:///README.md".into(),
                mime_type: Some("text/markdown".into()),
            }),
        ])
    }

    async fn is_healthy(&self) -> bool {
        self.server.health_checks.fetch_add(1, Ordering::SeqCst);
        !self.closed.load(Ordering::SeqCst) && self.server.healthy.load(Ordering::SeqCst)
    }

    fn closer(&self) -> Option<&dyn SessionClose> {
        Some(self)
    }
}

#[async_trait]
impl SessionClose for MockSession {
    async fn close(&self) -> TetherResult<()> {
        if self.server.close_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
            self.server.release();
        }
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.release();
        }
    }
}

/// A manager wired to a fresh mock server.
pub fn mock_manager(config: ManagerConfig) -> (ConnectionManager, Arc<MockServer>) {
    let server = Arc::new(MockServer::default());
    let registry = PluginRegistry::new();
    registry
        .register(Arc::new(MockFactory {
            server: Arc::clone(&server),
        }))
        .unwrap();
    let manager = ConnectionManager::new(config, Arc::new(registry)).unwrap();
    (manager, server)
}

pub fn request(uri: &str) -> ConnectionRequest {
    ConnectionRequest::new(uri, TRANSPORT)
}

pub fn echo_args(text: &str) -> ToolArguments {
    let mut args = ToolArguments::new();
    args.insert("text".into(), json!(text));
    args
}
