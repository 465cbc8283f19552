//! Transport plugin contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tether_protocol::{
    CallToolResult, InitializeResult, Primitive, TetherResult, ToolArguments, TransportType,
};

use crate::config::PluginConfig;

/// A configured transport plugin able to open sessions for URIs it supports.
#[async_trait]
pub trait TransportPlugin: Send + Sync + fmt::Debug {
    /// Returns the type of transport this plugin speaks.
    fn transport_type(&self) -> TransportType;

    /// Returns `true` if this plugin can handle `uri`.
    ///
    /// Pure: performs no I/O and has no side effects.
    fn is_supported(&self, uri: &str) -> bool;

    /// Opens the underlying channel without performing the protocol handshake.
    ///
    /// On failure every partially opened resource must already be released.
    async fn connect(&self, uri: &str) -> TetherResult<Box<dyn TransportSession>>;
}

/// A live transport handle returned by [`TransportPlugin::connect`].
#[async_trait]
pub trait TransportSession: Send + Sync + fmt::Debug {
    /// Performs the protocol handshake and records the advertised capabilities.
    async fn handshake(&self) -> TetherResult<InitializeResult>;

    /// Invokes a tool on the remote end.
    ///
    /// Remote rejections of the tool, its arguments or the method surface as
    /// tool errors; link failures surface as transport errors and are never
    /// swallowed.
    async fn call_tool(&self, name: &str, arguments: ToolArguments)
    -> TetherResult<CallToolResult>;

    /// Enumerates whichever primitive categories the remote end advertises.
    async fn list_primitives(&self) -> TetherResult<Vec<Primitive>>;

    /// Cheap liveness probe. Never fails; errors become `false`.
    async fn is_healthy(&self) -> bool;

    /// Second cheap probe used by the health monitor after `is_healthy`.
    async fn probe(&self) -> bool {
        self.is_healthy().await
    }

    /// Optional explicit close capability.
    ///
    /// Sessions returning `None` are released by dropping them.
    fn closer(&self) -> Option<&dyn SessionClose> {
        None
    }
}

/// Explicit close capability of a [`TransportSession`].
#[async_trait]
pub trait SessionClose: Send + Sync {
    /// Releases the session's resources. Must tolerate being called twice.
    async fn close(&self) -> TetherResult<()>;
}

/// Static description of a plugin, used for discovery listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    /// Transport type provided
    pub transport_type: TransportType,
    /// Human-readable plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Short description
    pub description: String,
    /// URI schemes the plugin accepts
    pub schemes: Vec<String>,
}

impl PluginMetadata {
    /// Create metadata for a plugin accepting the given URI schemes
    pub fn new(
        transport_type: TransportType,
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        schemes: &[&str],
    ) -> Self {
        Self {
            transport_type,
            name: name.into(),
            version: version.into(),
            description: description.into(),
            schemes: schemes.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Returns `true` if `uri` starts with one of the declared schemes.
    #[must_use]
    pub fn accepts_scheme(&self, uri: &str) -> bool {
        let Some((scheme, _)) = uri.split_once("://") else {
            return false;
        };
        self.schemes
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(scheme))
    }
}

/// Constructs configured plugin instances of one transport type.
pub trait PluginFactory: Send + Sync + fmt::Debug {
    /// Returns the type of transport this factory creates.
    fn transport_type(&self) -> TransportType {
        self.metadata().transport_type
    }

    /// Returns the plugin's static description.
    fn metadata(&self) -> PluginMetadata;

    /// Creates a plugin configured with `config`.
    fn create(&self, config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>>;

    /// Returns `true` if this plugin can run in the current host environment.
    fn is_available(&self) -> bool {
        true
    }
}
