//! Lifecycle events published by the connection manager.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_protocol::{ErrorKind, TransportType};
use tokio::sync::broadcast;
use tracing::trace;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEventKind {
    /// A connection attempt started.
    Connecting {
        /// Target URI
        uri: String,
    },

    /// The handshake completed and the connection is live.
    Connected {
        /// Target URI
        uri: String,
    },

    /// The connection was torn down or an attempt failed.
    Disconnected {
        /// Failure that caused it; `None` for an explicit disconnect.
        error: Option<String>,
    },

    /// A periodic or on-demand health check finished.
    HealthCheck {
        /// Whether both probes passed
        healthy: bool,
    },

    /// A fresh primitives list was fetched.
    ToolsListUpdated {
        /// Number of primitives in the new snapshot
        count: usize,
    },

    /// A tool call was dispatched.
    ToolCallStarted {
        /// Tool name
        name: String,
    },

    /// A tool call returned a result.
    ToolCallCompleted {
        /// Tool name
        name: String,
        /// The tool itself reported failure
        is_error: bool,
    },

    /// A tool call failed.
    ToolCallFailed {
        /// Tool name
        name: String,
        /// Error category
        #[serde(serialize_with = "serialize_kind")]
        kind: ErrorKind,
        /// Error message
        error: String,
    },
}

fn serialize_kind<S: serde::Serializer>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(kind)
}

/// A timestamped lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    /// When the event was published
    pub at: DateTime<Utc>,
    /// Transport of the connection concerned, if any
    pub transport: Option<TransportType>,
    /// Event payload
    #[serde(flatten)]
    pub kind: ConnectionEventKind,
}

/// In-process publish/subscribe for [`ConnectionEvent`]s.
///
/// Publishing never blocks. Slow subscribers lose the oldest events and see
/// `RecvError::Lagged`.
///
/// ```rust
/// # tokio_test::block_on(async {
/// use tether_client::{ConnectionEventKind, EventBus};
///
/// let bus = EventBus::new(16);
/// let mut events = bus.subscribe();
/// bus.emit(None, ConnectionEventKind::HealthCheck { healthy: true });
///
/// let event = events.recv().await.unwrap();
/// assert_eq!(event.kind, ConnectionEventKind::HealthCheck { healthy: true });
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event stamped with the current time.
    pub fn emit(&self, transport: Option<TransportType>, kind: ConnectionEventKind) {
        trace!(?transport, ?kind, "Publishing connection event");
        // No subscribers is not an error
        let _ = self.sender.send(ConnectionEvent {
            at: Utc::now(),
            transport,
            kind,
        });
    }
}
