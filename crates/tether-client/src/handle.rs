//! The live plugin instance and session owned by the manager.

use std::sync::Arc;
use std::time::Duration;

use tether_protocol::{InitializeResult, TransportType};
use tether_transport_traits::{TransportPlugin, TransportSession};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::request::ConnectionTarget;

/// A configured plugin plus the session it opened.
///
/// The manager holds at most one live handle. Closing is idempotent and
/// concurrent callers all wait for the same close to finish.
#[derive(Debug)]
pub struct PluginHandle {
    generation: u64,
    target: ConnectionTarget,
    plugin: Arc<dyn TransportPlugin>,
    session: Box<dyn TransportSession>,
    server: InitializeResult,
    closed: OnceCell<()>,
}

impl PluginHandle {
    pub(crate) fn new(
        generation: u64,
        target: ConnectionTarget,
        plugin: Arc<dyn TransportPlugin>,
        session: Box<dyn TransportSession>,
        server: InitializeResult,
    ) -> Self {
        Self {
            generation,
            target,
            plugin,
            session,
            server,
            closed: OnceCell::new(),
        }
    }

    /// Attempt generation that produced this handle
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// What this handle is connected to
    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Transport in use
    #[must_use]
    pub fn transport_type(&self) -> TransportType {
        self.plugin.transport_type()
    }

    /// Handshake result reported by the server
    #[must_use]
    pub fn server(&self) -> &InitializeResult {
        &self.server
    }

    /// Returns `true` once [`disconnect`](Self::disconnect) has completed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.initialized()
    }

    pub(crate) fn session(&self) -> &dyn TransportSession {
        self.session.as_ref()
    }

    /// Close the session, waiting at most `bound`. A second call is a no-op.
    pub(crate) async fn disconnect(&self, bound: Duration) {
        self.closed
            .get_or_init(|| async {
                let Some(closer) = self.session.closer() else {
                    debug!(connection = %self.target, "Session has no close capability, releasing by drop");
                    return;
                };
                match tokio::time::timeout(bound, closer.close()).await {
                    Ok(Ok(())) => debug!(connection = %self.target, "Session closed"),
                    Ok(Err(e)) => warn!(connection = %self.target, error = %e, "Session close failed"),
                    Err(_) => warn!(
                        connection = %self.target,
                        timeout = ?bound,
                        "Session close timed out, abandoning it"
                    ),
                }
            })
            .await;
    }
}
