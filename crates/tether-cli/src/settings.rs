//! Layered settings: config file, then `TETHER_*` environment, then flags.
//!
//! ```toml
//! [manager]
//! connect_timeout = 5000
//! max_consecutive_failures = 3
//!
//! [connection]
//! uri = "https://tools.example.com/mcp"
//! transport = "streamable-http"
//!
//! [connection.plugin_config]
//! auth_token = "..."
//! ```

use std::path::Path;

use config::{Config, Environment, File, Map};
use serde::Deserialize;
use tether_client::{
    ConnectionRequest, ManagerConfig, PluginConfig, PluginRegistry, TransportType,
};
use tracing::debug;

use crate::cli::Connection;
use crate::error::{CliError, CliResult};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TETHER";

/// Everything the CLI reads from files and the environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection manager tuning
    pub manager: ManagerConfig,
    /// Default connection target
    pub connection: ConnectionSettings,
}

/// The `[connection]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Server URI
    pub uri: Option<String>,
    /// Transport; selected from the URI when absent
    pub transport: Option<TransportType>,
    /// Opaque plugin configuration
    pub plugin_config: PluginConfig,
}

impl Settings {
    /// Load from an optional file layered under the process environment.
    ///
    /// # Errors
    ///
    /// Fails if `path` is given but missing or malformed, if an environment
    /// override has the wrong type, or if the resulting manager config is
    /// invalid.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load) with an explicit environment map instead of
    /// the process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> CliResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            // TETHER_MANAGER__CONNECT_TIMEOUT -> manager.connect_timeout
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.manager.validate()?;
        Ok(settings)
    }

    /// Resolve the connection request from flags over settings.
    ///
    /// A flag plugin config replaces the file's table; `--auth-token` is
    /// applied last.
    ///
    /// # Errors
    ///
    /// `MissingUri` without a URI anywhere; invalid `--plugin-config` JSON;
    /// a configuration error if no registered transport claims the URI.
    pub fn request(
        &self,
        flags: &Connection,
        registry: &PluginRegistry,
    ) -> CliResult<ConnectionRequest> {
        let uri = flags
            .uri
            .clone()
            .or_else(|| self.connection.uri.clone())
            .ok_or(CliError::MissingUri)?;

        let mut plugin_config = match &flags.plugin_config {
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                    CliError::InvalidArguments(format!("Invalid --plugin-config JSON: {e}"))
                })?;
                PluginConfig::from_value(value)?
            }
            None => self.connection.plugin_config.clone(),
        };
        if let Some(token) = &flags.auth_token {
            plugin_config.insert(tether_client::AUTH_TOKEN_KEY, token.clone());
        }

        let transport = match flags.transport.or(self.connection.transport) {
            Some(transport) => transport,
            None => registry.select_for_uri(&uri, &plugin_config)?,
        };
        debug!(uri = %uri, transport = %transport, "Resolved connection request");
        Ok(ConnectionRequest::new(uri, transport).with_plugin_config(plugin_config))
    }
}
