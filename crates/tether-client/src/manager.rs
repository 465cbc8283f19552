//! Connection manager: single owner of one logical connection.
//!
//! # Key Concepts
//!
//! - **One live handle**: at most one [`PluginHandle`] exists at a time. A new
//!   attempt closes the previous handle (bounded by `close_timeout`) before it
//!   opens a transport.
//! - **Deduplicated attempts**: concurrent `connect` calls for the same target
//!   share one in-flight attempt. The attempt runs as its own task, so it
//!   completes even if every caller stops waiting.
//! - **Generations**: every attempt bumps a generation counter. Results,
//!   health checks and failures tagged with an old generation are discarded,
//!   so a superseded attempt can never clobber a newer one.
//! - **Recoverable failure budget**: consecutive connect failures are counted;
//!   at `max_consecutive_failures` connects fail fast until periodic recovery
//!   forgives one failure per tick or the user forces a reconnect.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//! Connecting --failure--> Disconnected | PermanentlyFailed
//! Connected --health failure--> Degraded --health failure--> Disconnected
//! Connected/Degraded --transport error on call--> Disconnected
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tether_protocol::{
    CallToolResult, ErrorKind, InitializeResult, ServerInfo, TetherError, TetherResult, ToolArguments,
    TransportType,
};
use tether_transport_traits::{PluginConfig, TaskGuard, TransportPlugin, TransportSession};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{PrimitivesCache, PrimitivesSnapshot};
use crate::config::ManagerConfig;
use crate::events::{ConnectionEvent, ConnectionEventKind, EventBus};
use crate::failure::FailureRecord;
use crate::handle::PluginHandle;
use crate::registry::PluginRegistry;
use crate::request::{ConnectionRequest, ConnectionTarget};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// An attempt is in flight
    Connecting,
    /// Connected and the last health check passed
    Connected,
    /// Connected but the last health check failed
    Degraded,
    /// Failure budget exhausted; connects fail fast until recovery
    PermanentlyFailed,
}

impl ConnectionState {
    /// Returns `true` for `Connected` and `Degraded`
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
            Self::PermanentlyFailed => write!(f, "permanently failed"),
        }
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Target of the current or last requested connection
    pub target: Option<ConnectionTarget>,
    /// Consecutive failure bookkeeping
    pub failures: FailureRecord,
    /// Last passing health check (or connect) of the live connection
    pub last_healthy_at: Option<DateTime<Utc>>,
    /// Current attempt generation
    pub generation: u64,
    /// Server identity reported by the handshake
    pub server: Option<ServerInfo>,
}

type AttemptOutcome = Shared<BoxFuture<'static, TetherResult<()>>>;

struct PendingAttempt {
    generation: u64,
    target: ConnectionTarget,
    outcome: AttemptOutcome,
    abort: AbortHandle,
}

struct ManagerState {
    status: ConnectionState,
    request: Option<ConnectionRequest>,
    failures: FailureRecord,
    generation: u64,
    attempt: Option<PendingAttempt>,
    active: Option<Arc<PluginHandle>>,
    /// Handles released in the background whose close may still be running
    retired: Vec<Arc<PluginHandle>>,
    cache: PrimitivesCache,
    last_healthy: Option<(Instant, DateTime<Utc>)>,
    monitor: Option<TaskGuard>,
    recovery: Option<TaskGuard>,
    background_check: bool,
    shut_down: bool,
}

impl ManagerState {
    fn new(config: &ManagerConfig) -> Self {
        Self {
            status: ConnectionState::Disconnected,
            request: None,
            failures: FailureRecord::default(),
            generation: 0,
            attempt: None,
            active: None,
            retired: Vec::new(),
            cache: PrimitivesCache::new(config.primitives_ttl),
            last_healthy: None,
            monitor: None,
            recovery: None,
            background_check: false,
            shut_down: false,
        }
    }

    fn transport(&self) -> Option<TransportType> {
        self.request.as_ref().map(|r| r.transport)
    }

    fn target(&self) -> Option<ConnectionTarget> {
        self.request.as_ref().map(ConnectionRequest::target)
    }

    fn mark_healthy(&mut self) {
        self.last_healthy = Some((Instant::now(), Utc::now()));
    }

    fn supersede_attempt(&mut self) -> Option<AttemptOutcome> {
        self.attempt.take().map(|pending| {
            debug!(generation = pending.generation, "Aborting in-flight connection attempt");
            pending.abort.abort();
            pending.outcome
        })
    }

    /// Detaches the live handle, its monitor and its cached primitives.
    ///
    /// `from_monitor` is set when the monitor task itself is releasing the
    /// connection and must not abort itself.
    fn release_connection(&mut self, from_monitor: bool) -> Vec<Arc<PluginHandle>> {
        if let Some(monitor) = self.monitor.take() {
            if from_monitor {
                monitor.detach();
            } else {
                drop(monitor);
            }
        }
        self.cache.invalidate();
        self.last_healthy = None;
        let mut handles = std::mem::take(&mut self.retired);
        handles.extend(self.active.take());
        handles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Idempotent connect: reuse a live connection to the same target
    Connect,
    /// Rebuild a stale connection to the same target
    Refresh,
    /// Supersede whatever is in flight
    Force,
}

struct Inner {
    config: ManagerConfig,
    registry: Arc<PluginRegistry>,
    events: EventBus,
    state: Mutex<ManagerState>,
}

/// Owns the lifecycle of a single logical connection.
///
/// Cheap to clone; clones share the same connection.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tether_client::{
///     ConnectionManager, ConnectionRequest, ManagerConfig, PluginRegistry, TetherResult,
///     ToolArguments, TransportType,
/// };
///
/// # async fn example() -> TetherResult<()> {
/// let manager = ConnectionManager::new(
///     ManagerConfig::default(),
///     Arc::new(PluginRegistry::with_defaults()),
/// )?;
/// manager.init()?;
///
/// manager
///     .connect(ConnectionRequest::new("http://localhost:8080/mcp", TransportType::StreamableHttp))
///     .await?;
/// let tools = manager.get_primitives(false).await?;
/// let result = manager.call_tool("echo", ToolArguments::new()).await?;
///
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &state.status)
            .field("target", &state.target())
            .field("generation", &state.generation)
            .field("failures", &state.failures.consecutive_failures)
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager. No timers run until [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: ManagerConfig, registry: Arc<PluginRegistry>) -> TetherResult<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        let state = Mutex::new(ManagerState::new(&config));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                events,
                state,
            }),
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Plugin registry in use
    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    /// Start the periodic recovery timer. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails outside a Tokio runtime or after [`shutdown`](Self::shutdown).
    pub fn init(&self) -> TetherResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TetherError::configuration("ConnectionManager::init requires a Tokio runtime")
        })?;
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return Err(shut_down_error());
        }
        if state.recovery.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.recovery_interval;
        state.recovery = Some(TaskGuard::new(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.reset_for_recovery();
            }
        })));
        info!(recovery_interval = ?interval, "Connection manager initialized");
        Ok(())
    }

    /// Cancel every timer and in-flight attempt, close the live handle and
    /// refuse further connects. Idempotent.
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.recovery = None;
            state.generation += 1;
            state.supersede_attempt();
            let was = state.status;
            let handles = state.release_connection(false);
            state.status = ConnectionState::Disconnected;
            if was.is_connected() || was == ConnectionState::Connecting {
                self.inner.events.emit(
                    state.transport(),
                    ConnectionEventKind::Disconnected { error: None },
                );
            }
            state.request = None;
            handles
        };
        self.inner.close_all(handles).await;
        info!("Connection manager shut down");
    }

    /// Connect to `request`'s target.
    ///
    /// Returns immediately if already connected to the same target, joins an
    /// in-flight attempt to the same target, and otherwise tears down any
    /// existing connection before opening a new one.
    ///
    /// # Errors
    ///
    /// - Configuration errors for malformed URIs, unknown transports and bad
    ///   plugin config. These never count as failures.
    /// - `RetryBudgetExhausted` while the failure budget is spent.
    /// - `Superseded` if a newer attempt replaced this one.
    /// - Transport, timeout or tool errors from the attempt itself.
    pub async fn connect(&self, request: ConnectionRequest) -> TetherResult<()> {
        match self.inner.begin(request, Mode::Connect)? {
            Some(outcome) => outcome.await,
            None => Ok(()),
        }
    }

    /// Tear down the connection and forget the last request.
    ///
    /// Later tool calls fail with `NotConnected` instead of silently
    /// reconnecting. The failure record is left alone.
    pub async fn disconnect(&self) {
        let handles = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.supersede_attempt();
            let was = state.status;
            let handles = state.release_connection(false);
            if was != ConnectionState::PermanentlyFailed {
                state.status = ConnectionState::Disconnected;
            }
            if was.is_connected() || was == ConnectionState::Connecting {
                info!(connection = ?state.target(), "Disconnecting");
                self.inner.events.emit(
                    state.transport(),
                    ConnectionEventKind::Disconnected { error: None },
                );
            }
            state.request = None;
            handles
        };
        self.inner.close_all(handles).await;
    }

    /// User-initiated recovery: clean failure slate, tear down, reconnect.
    ///
    /// `uri` replaces the target URI. Without a previous request the
    /// transport is selected from the registry by URI.
    ///
    /// # Errors
    ///
    /// `NotConnected` if there is neither a previous request nor a `uri`;
    /// otherwise as [`connect`](Self::connect).
    pub async fn force_reconnect(&self, uri: Option<String>) -> TetherResult<()> {
        let request = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(shut_down_error());
            }
            state.failures.reset();
            if state.status == ConnectionState::PermanentlyFailed {
                state.status = ConnectionState::Disconnected;
            }
            state.request.clone()
        };
        let request = match (request, uri) {
            (Some(mut request), Some(uri)) => {
                request.uri = uri;
                request
            }
            (Some(request), None) => request,
            (None, Some(uri)) => {
                let transport = self
                    .inner
                    .registry
                    .select_for_uri(&uri, &PluginConfig::new())?;
                ConnectionRequest::new(uri, transport)
            }
            (None, None) => return Err(TetherError::NotConnected),
        };
        info!(uri = %request.uri, transport = %request.transport, "Forcing reconnect");
        match self.inner.begin(request, Mode::Force)? {
            Some(outcome) => outcome.await,
            None => Ok(()),
        }
    }

    /// Returns the live handle, rebuilding the connection first if it is
    /// down or its last passing health check is older than
    /// `freshness_window`.
    ///
    /// # Errors
    ///
    /// `NotConnected` if nothing was ever requested (or after
    /// [`disconnect`](Self::disconnect)); otherwise as
    /// [`connect`](Self::connect).
    pub async fn ensure_connection(&self) -> TetherResult<Arc<PluginHandle>> {
        enum Next {
            Ready(Arc<PluginHandle>),
            Wait(AttemptOutcome),
            Reconnect(ConnectionRequest),
        }

        let next = {
            let state = self.inner.state.lock();
            if state.shut_down {
                return Err(shut_down_error());
            }
            let fresh = state
                .last_healthy
                .is_some_and(|(at, _)| at.elapsed() <= self.inner.config.freshness_window);
            match (&state.active, &state.attempt, &state.request) {
                (Some(handle), _, _) if state.status.is_connected() && fresh => {
                    Next::Ready(Arc::clone(handle))
                }
                (_, Some(pending), _) => Next::Wait(pending.outcome.clone()),
                (_, None, Some(request)) => Next::Reconnect(request.clone()),
                (_, None, None) => return Err(TetherError::NotConnected),
            }
        };

        match next {
            Next::Ready(handle) => return Ok(handle),
            Next::Wait(outcome) => outcome.await?,
            Next::Reconnect(request) => {
                info!(uri = %request.uri, "Connection down or stale, reconnecting");
                if let Some(outcome) = self.inner.begin(request, Mode::Refresh)? {
                    outcome.await?;
                }
            }
        }

        let state = self.inner.state.lock();
        match &state.active {
            Some(handle) if state.status.is_connected() => Ok(Arc::clone(handle)),
            _ => Err(TetherError::NotConnected),
        }
    }

    /// Invoke a tool on the connected server.
    ///
    /// Transport-shaped failures mark the connection down immediately so the
    /// next caller reconnects; tool-shaped failures leave it untouched.
    ///
    /// # Errors
    ///
    /// Tool errors from the server, transport/timeout errors from the link,
    /// or any error from [`ensure_connection`](Self::ensure_connection).
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> TetherResult<CallToolResult> {
        let handle = self.ensure_connection().await?;
        let transport = Some(handle.transport_type());
        self.inner.events.emit(
            transport,
            ConnectionEventKind::ToolCallStarted {
                name: name.to_string(),
            },
        );
        debug!(tool = name, generation = handle.generation(), "Calling tool");

        let bound = self.inner.config.request_timeout;
        let result =
            match tokio::time::timeout(bound, handle.session().call_tool(name, arguments)).await {
                Ok(result) => result,
                Err(_) => Err(TetherError::timeout(format!("tools/call {name}"), bound)),
            };

        match result {
            Ok(result) => {
                self.inner.events.emit(
                    transport,
                    ConnectionEventKind::ToolCallCompleted {
                        name: name.to_string(),
                        is_error: result.is_error,
                    },
                );
                Ok(result)
            }
            Err(e) => {
                self.inner.events.emit(
                    transport,
                    ConnectionEventKind::ToolCallFailed {
                        name: name.to_string(),
                        kind: e.kind(),
                        error: e.to_string(),
                    },
                );
                if e.is_connection_shaped() {
                    self.inner.mark_transport_failure(handle.generation(), &e);
                } else {
                    debug!(tool = name, error = %e, "Tool call rejected, connection unaffected");
                }
                Err(e)
            }
        }
    }

    /// Returns the server's primitives, from cache when fresh.
    ///
    /// # Errors
    ///
    /// As [`ensure_connection`](Self::ensure_connection), plus listing
    /// failures from the server.
    pub async fn get_primitives(&self, force_refresh: bool) -> TetherResult<Arc<PrimitivesSnapshot>> {
        let cached = self.inner.state.lock().cache.get(force_refresh);
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }

        let handle = self.ensure_connection().await?;
        let bound = self.inner.config.request_timeout;
        let listed = match tokio::time::timeout(bound, handle.session().list_primitives()).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::timeout("list primitives", bound)),
        };

        match listed {
            Ok(primitives) => {
                let snapshot = Arc::new(PrimitivesSnapshot::new(primitives));
                {
                    let mut state = self.inner.state.lock();
                    // A reconnect in the meantime owns the cache now
                    if state.generation == handle.generation() && state.active.is_some() {
                        state.cache.store(Arc::clone(&snapshot));
                    }
                }
                debug!(count = snapshot.len(), "Fetched primitives");
                self.inner.events.emit(
                    Some(handle.transport_type()),
                    ConnectionEventKind::ToolsListUpdated {
                        count: snapshot.len(),
                    },
                );
                Ok(snapshot)
            }
            Err(e) => {
                if e.is_connection_shaped() {
                    self.inner.mark_transport_failure(handle.generation(), &e);
                }
                Err(e)
            }
        }
    }

    /// Cheap, non-blocking connectivity check.
    ///
    /// When the last passing health check is older than `very_stale_after`,
    /// at most one background check is scheduled; the answer returned is
    /// always the current state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let mut state = self.inner.state.lock();
        let connected = state.status.is_connected() && state.active.is_some();
        if connected && !state.background_check && !state.shut_down {
            let very_stale = state
                .last_healthy
                .is_none_or(|(at, _)| at.elapsed() > self.inner.config.very_stale_after);
            if very_stale && let Ok(runtime) = tokio::runtime::Handle::try_current() {
                debug!("Connection status very stale, scheduling background health check");
                state.background_check = true;
                let inner = Arc::clone(&self.inner);
                let generation = state.generation;
                runtime.spawn(async move {
                    inner.check_health(generation, false).await;
                    inner.state.lock().background_check = false;
                });
            }
        }
        connected
    }

    /// Snapshot of state, target, failures and liveness.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let state = self.inner.state.lock();
        ConnectionStatus {
            state: state.status,
            target: state.target(),
            failures: state.failures.clone(),
            last_healthy_at: state.last_healthy.map(|(_, at)| at),
            generation: state.generation,
            server: state
                .active
                .as_ref()
                .map(|handle| handle.server().server_info.clone()),
        }
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Full reset of the failure record, for user-initiated recovery.
    pub fn reset_failure_state(&self) {
        let mut state = self.inner.state.lock();
        state.failures.reset();
        if state.status == ConnectionState::PermanentlyFailed {
            state.status = ConnectionState::Disconnected;
        }
        info!("Failure state reset");
    }

    /// One step of periodic recovery: forgive a single failure, keep history.
    ///
    /// Runs automatically every `recovery_interval` after [`init`](Self::init).
    pub fn reset_for_recovery(&self) {
        self.inner.reset_for_recovery();
    }
}

impl Inner {
    /// Decide how to satisfy a connect request; `None` means already connected.
    fn begin(
        self: &Arc<Self>,
        request: ConnectionRequest,
        mode: Mode,
    ) -> TetherResult<Option<AttemptOutcome>> {
        request.validate()?;
        let target = request.target();
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(shut_down_error());
        }

        if mode == Mode::Connect
            && state.status.is_connected()
            && state.active.is_some()
            && state.target().as_ref() == Some(&target)
        {
            debug!(connection = %target, "Already connected");
            return Ok(None);
        }

        if mode != Mode::Force
            && let Some(pending) = &state.attempt
            && pending.target == target
        {
            debug!(connection = %target, generation = pending.generation, "Joining in-flight connection attempt");
            return Ok(Some(pending.outcome.clone()));
        }

        let limit = self.config.max_consecutive_failures;
        if mode != Mode::Force && state.failures.is_exhausted(limit) {
            state.status = ConnectionState::PermanentlyFailed;
            let failures = state.failures.consecutive_failures;
            warn!(connection = %target, failures, limit, "Failure budget exhausted, not connecting");
            return Err(TetherError::RetryBudgetExhausted { failures, limit });
        }

        let plugin = self
            .registry
            .get_initialized_plugin(request.transport, &request.plugin_config)?;
        if !plugin.is_supported(&request.uri) {
            return Err(TetherError::configuration(format!(
                "Transport '{}' does not support '{}'",
                request.transport, request.uri
            )));
        }

        Ok(Some(self.start_attempt(&mut state, request, plugin)))
    }

    fn start_attempt(
        self: &Arc<Self>,
        state: &mut ManagerState,
        request: ConnectionRequest,
        plugin: Arc<dyn TransportPlugin>,
    ) -> AttemptOutcome {
        state.generation += 1;
        let generation = state.generation;
        let previous = state.supersede_attempt();
        let teardown = state.release_connection(false);
        state.status = ConnectionState::Connecting;
        state.request = Some(request.clone());

        let target = request.target();
        info!(connection = %target, generation, "Connecting");
        self.events.emit(
            Some(request.transport),
            ConnectionEventKind::Connecting {
                uri: request.uri.clone(),
            },
        );

        let task = tokio::spawn(Arc::clone(self).run_attempt(
            generation, request, plugin, previous, teardown,
        ));
        let abort = task.abort_handle();
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(TetherError::Superseded),
                Err(e) => Err(TetherError::transport(format!(
                    "Connection attempt panicked: {e}"
                ))),
            }
        }
        .boxed()
        .shared();

        state.attempt = Some(PendingAttempt {
            generation,
            target,
            outcome: outcome.clone(),
            abort,
        });
        outcome
    }

    async fn run_attempt(
        self: Arc<Self>,
        generation: u64,
        request: ConnectionRequest,
        plugin: Arc<dyn TransportPlugin>,
        previous: Option<AttemptOutcome>,
        teardown: Vec<Arc<PluginHandle>>,
    ) -> TetherResult<()> {
        let close_timeout = self.config.close_timeout;
        // Wait until the aborted attempt has dropped whatever it had opened
        if let Some(previous) = previous {
            let _ = tokio::time::timeout(close_timeout, previous).await;
        }
        for handle in teardown {
            handle.disconnect(close_timeout).await;
        }

        let opened = self.open_session(&request, plugin.as_ref()).await;

        let stale = {
            let mut state = self.state.lock();
            if state.generation == generation && !state.shut_down {
                return self.commit(&mut state, generation, request, plugin, opened);
            }
            opened.ok().map(|(session, _)| session)
        };

        debug!(generation, "Discarding result of superseded connection attempt");
        if let Some(session) = stale
            && let Some(closer) = session.closer()
        {
            let _ = tokio::time::timeout(close_timeout, closer.close()).await;
        }
        Err(TetherError::Superseded)
    }

    /// Open the transport and run the handshake, each under its own bound.
    async fn open_session(
        &self,
        request: &ConnectionRequest,
        plugin: &dyn TransportPlugin,
    ) -> TetherResult<(Box<dyn TransportSession>, InitializeResult)> {
        let connect_timeout = self.config.connect_timeout;
        let session = tokio::time::timeout(connect_timeout, plugin.connect(&request.uri))
            .await
            .map_err(|_| TetherError::timeout("connect", connect_timeout))??;

        let request_timeout = self.config.request_timeout;
        let handshake = match tokio::time::timeout(request_timeout, session.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::timeout("handshake", request_timeout)),
        };
        match handshake {
            Ok(server) => Ok((session, server)),
            Err(e) => {
                if let Some(closer) = session.closer() {
                    let _ = tokio::time::timeout(self.config.close_timeout, closer.close()).await;
                }
                Err(e)
            }
        }
    }

    fn commit(
        self: &Arc<Self>,
        state: &mut ManagerState,
        generation: u64,
        request: ConnectionRequest,
        plugin: Arc<dyn TransportPlugin>,
        opened: TetherResult<(Box<dyn TransportSession>, InitializeResult)>,
    ) -> TetherResult<()> {
        state.attempt = None;
        let target = request.target();
        match opened {
            Ok((session, server)) => {
                info!(
                    connection = %target,
                    generation,
                    server = %server.server_info.name,
                    server_version = %server.server_info.version,
                    "Connected"
                );
                state.active = Some(Arc::new(PluginHandle::new(
                    generation,
                    target,
                    plugin,
                    session,
                    server,
                )));
                state.failures.record_success();
                state.status = ConnectionState::Connected;
                state.mark_healthy();
                state.monitor = Some(self.spawn_monitor(generation));
                self.events.emit(
                    Some(request.transport),
                    ConnectionEventKind::Connected { uri: request.uri },
                );
                Ok(())
            }
            Err(e) => {
                if e.kind() == ErrorKind::Configuration {
                    state.status = ConnectionState::Disconnected;
                    warn!(connection = %target, error = %e, "Connection rejected by configuration");
                } else {
                    state.failures.record_failure(&e);
                    state.status = if state
                        .failures
                        .is_exhausted(self.config.max_consecutive_failures)
                    {
                        ConnectionState::PermanentlyFailed
                    } else {
                        ConnectionState::Disconnected
                    };
                    warn!(
                        connection = %target,
                        generation,
                        failures = state.failures.consecutive_failures,
                        state = %state.status,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
                self.events.emit(
                    Some(request.transport),
                    ConnectionEventKind::Disconnected {
                        error: Some(e.to_string()),
                    },
                );
                Err(e)
            }
        }
    }

    /// Periodic health monitor for one generation. Holds only a weak
    /// reference so it never keeps the manager alive.
    fn spawn_monitor(self: &Arc<Self>, generation: u64) -> TaskGuard {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.health_check_interval;
        TaskGuard::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.check_health(generation, true).await {
                    debug!(generation, "Health monitor stopped");
                    return;
                }
            }
        }))
    }

    /// Probe the live handle of `generation`. Returns `false` once there is
    /// nothing left to monitor.
    async fn check_health(self: &Arc<Self>, generation: u64, from_monitor: bool) -> bool {
        let handle = {
            let state = self.state.lock();
            match &state.active {
                Some(handle) if state.generation == generation => Arc::clone(handle),
                _ => return false,
            }
        };
        let healthy = tokio::time::timeout(self.config.health_check_timeout, async {
            handle.session().is_healthy().await && handle.session().probe().await
        })
        .await
        .unwrap_or(false);
        self.apply_health(generation, healthy, from_monitor)
    }

    fn apply_health(self: &Arc<Self>, generation: u64, healthy: bool, from_monitor: bool) -> bool {
        let released = {
            let mut state = self.state.lock();
            if state.generation != generation || state.active.is_none() {
                return false;
            }
            let transport = state.transport();
            self.events
                .emit(transport, ConnectionEventKind::HealthCheck { healthy });

            if healthy {
                state.mark_healthy();
                if state.status == ConnectionState::Degraded {
                    info!(generation, "Health check passed, connection restored");
                    state.status = ConnectionState::Connected;
                }
                return true;
            }
            if state.status == ConnectionState::Connected {
                warn!(generation, "Health check failed, connection degraded");
                state.status = ConnectionState::Degraded;
                return true;
            }

            warn!(generation, "Health check failed again, disconnecting");
            let released = state.release_connection(from_monitor);
            state.status = ConnectionState::Disconnected;
            state.retired.extend(released.iter().cloned());
            self.events.emit(
                transport,
                ConnectionEventKind::Disconnected {
                    error: Some("Health check failed".to_string()),
                },
            );
            released
        };
        self.close_in_background(released);
        false
    }

    /// A link failure on the live connection of `generation`.
    fn mark_transport_failure(self: &Arc<Self>, generation: u64, error: &TetherError) {
        let released = {
            let mut state = self.state.lock();
            if state.generation != generation || state.active.is_none() {
                return;
            }
            warn!(generation, error = %error, "Transport failure, marking connection down");
            let released = state.release_connection(false);
            state.status = ConnectionState::Disconnected;
            state.retired.extend(released.iter().cloned());
            self.events.emit(
                state.transport(),
                ConnectionEventKind::Disconnected {
                    error: Some(error.to_string()),
                },
            );
            released
        };
        self.close_in_background(released);
    }

    /// Close released handles without blocking the caller. The next attempt
    /// still waits for them through `retired`.
    fn close_in_background(self: &Arc<Self>, handles: Vec<Arc<PluginHandle>>) {
        if handles.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.close_all(handles).await;
            inner.state.lock().retired.retain(|h| !h.is_closed());
        });
    }

    async fn close_all(&self, handles: Vec<Arc<PluginHandle>>) {
        for handle in handles {
            handle.disconnect(self.config.close_timeout).await;
        }
    }

    fn reset_for_recovery(&self) {
        let mut state = self.state.lock();
        if state.failures.consecutive_failures == 0 {
            return;
        }
        state.failures.relax();
        let failures = state.failures.consecutive_failures;
        debug!(failures, "Periodic recovery forgave one failure");
        if state.status == ConnectionState::PermanentlyFailed
            && !state.failures.is_exhausted(self.config.max_consecutive_failures)
        {
            info!(failures, "Failure budget recovered, connects allowed again");
            state.status = ConnectionState::Disconnected;
        }
    }
}

fn shut_down_error() -> TetherError {
    TetherError::configuration("Connection manager has been shut down")
}
