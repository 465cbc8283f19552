//! Connection requests and targets.

use std::fmt;

use serde::{Deserialize, Serialize};
use tether_protocol::{TetherError, TetherResult, TransportType};
use tether_transport_traits::PluginConfig;

/// What to connect to and how. Immutable once handed to the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    /// Server URI
    pub uri: String,
    /// Wire transport
    pub transport: TransportType,
    /// Opaque per-plugin configuration
    #[serde(default)]
    pub plugin_config: PluginConfig,
}

impl ConnectionRequest {
    /// Create a request with an empty plugin configuration
    pub fn new(uri: impl Into<String>, transport: TransportType) -> Self {
        Self {
            uri: uri.into(),
            transport,
            plugin_config: PluginConfig::new(),
        }
    }

    /// Set the plugin configuration
    #[must_use]
    pub fn with_plugin_config(mut self, config: PluginConfig) -> Self {
        self.plugin_config = config;
        self
    }

    /// Identity used for idempotence and attempt deduplication
    #[must_use]
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget {
            uri: self.uri.clone(),
            transport: self.transport,
        }
    }

    pub(crate) fn validate(&self) -> TetherResult<()> {
        if self.uri.trim().is_empty() {
            return Err(TetherError::configuration("Connection URI is empty"));
        }
        if !self.uri.contains("://") {
            return Err(TetherError::configuration(format!(
                "Connection URI '{}' has no scheme",
                self.uri
            )));
        }
        Ok(())
    }
}

/// URI plus transport: two requests with the same target share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionTarget {
    /// Server URI
    pub uri: String,
    /// Wire transport
    pub transport: TransportType,
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.transport)
    }
}
