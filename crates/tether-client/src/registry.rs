//! Plugin registry and discovery.
//!
//! The registry holds one [`PluginFactory`] per transport type and lazily
//! builds configured plugin instances. Each transport type keeps only the
//! instance for the configuration it was last asked for.
//!
//! # Loading defaults
//!
//! [`PluginRegistry::load_defaults`] runs a [`PluginDiscovery`] and, if it
//! fails or finds nothing, falls back to [`PluginRegistry::register_builtin`],
//! which calls the statically known constructors directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_protocol::{TetherError, TetherResult, TransportType};
use tether_transport_traits::{PluginConfig, PluginFactory, PluginMetadata, TransportPlugin};
use tracing::{debug, info, warn};

/// Source of plugin factories for [`PluginRegistry::load_defaults`].
pub trait PluginDiscovery: Send + Sync + fmt::Debug {
    /// Enumerate the factories this source knows about.
    fn discover(&self) -> TetherResult<Vec<Arc<dyn PluginFactory>>>;
}

/// Discovers the plugins compiled into this crate that can run here.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledDiscovery;

impl PluginDiscovery for BundledDiscovery {
    fn discover(&self) -> TetherResult<Vec<Arc<dyn PluginFactory>>> {
        Ok(bundled_factories()
            .into_iter()
            .filter(|factory| {
                let available = factory.is_available();
                if !available {
                    debug!(plugin = %factory.metadata().name, "Bundled plugin unavailable in this host");
                }
                available
            })
            .collect())
    }
}

/// Factories of every plugin enabled by crate features, in preference order.
#[must_use]
pub fn bundled_factories() -> Vec<Arc<dyn PluginFactory>> {
    #[allow(unused_mut)]
    let mut factories: Vec<Arc<dyn PluginFactory>> = Vec::new();
    #[cfg(feature = "http")]
    {
        factories.push(Arc::new(tether_http::StreamableHttpFactory));
        factories.push(Arc::new(tether_http::SseFactory));
    }
    #[cfg(feature = "websocket")]
    factories.push(Arc::new(tether_websocket::WebSocketFactory));
    factories
}

/// Outcome of [`PluginRegistry::load_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Factories returned by discovery
    pub discovered: usize,
    /// Factories newly registered
    pub registered: usize,
    /// Whether the static fallback ran
    pub fallback_used: bool,
}

#[derive(Default)]
struct RegistryInner {
    /// Registration order is preserved for URI selection
    factories: Vec<Arc<dyn PluginFactory>>,
    /// Latest instance per transport, tagged with its canonical config
    instances: HashMap<TransportType, (String, Arc<dyn TransportPlugin>)>,
}

/// Registry of transport plugins.
#[derive(Default)]
pub struct PluginRegistry {
    inner: RwLock<RegistryInner>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PluginRegistry")
            .field(
                "transports",
                &inner
                    .factories
                    .iter()
                    .map(|f| f.transport_type())
                    .collect::<Vec<_>>(),
            )
            .field("instances", &inner.instances.len())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the bundled plugins loaded
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.load_defaults(&BundledDiscovery);
        registry
    }

    /// Register a plugin factory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a factory for the same transport type
    /// is already registered.
    pub fn register(&self, factory: Arc<dyn PluginFactory>) -> TetherResult<()> {
        let metadata = factory.metadata();
        let mut inner = self.inner.write();
        if inner
            .factories
            .iter()
            .any(|f| f.transport_type() == metadata.transport_type)
        {
            return Err(TetherError::configuration(format!(
                "A plugin for transport '{}' is already registered",
                metadata.transport_type
            )));
        }
        info!(
            transport = %metadata.transport_type,
            plugin = %metadata.name,
            version = %metadata.version,
            "Registered transport plugin"
        );
        inner.factories.push(factory);
        Ok(())
    }

    /// Returns `true` if a factory for `transport` is registered
    #[must_use]
    pub fn contains(&self, transport: TransportType) -> bool {
        self.inner
            .read()
            .factories
            .iter()
            .any(|f| f.transport_type() == transport)
    }

    /// Number of registered factories
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().factories.len()
    }

    /// Returns `true` if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().factories.is_empty()
    }

    /// Metadata of every registered plugin, in registration order.
    #[must_use]
    pub fn list_available(&self) -> Vec<PluginMetadata> {
        self.inner
            .read()
            .factories
            .iter()
            .map(|f| f.metadata())
            .collect()
    }

    /// Returns a configured plugin, building it on first use.
    ///
    /// The instance is memoized per transport type and the canonical form of
    /// `config`, so equal configurations share one plugin. A different
    /// configuration replaces the transport's cached instance.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no plugin is registered for
    /// `transport` or the plugin rejects `config`.
    pub fn get_initialized_plugin(
        &self,
        transport: TransportType,
        config: &PluginConfig,
    ) -> TetherResult<Arc<dyn TransportPlugin>> {
        let key = config.canonical_key();
        if let Some((cached, plugin)) = self.inner.read().instances.get(&transport)
            && *cached == key
        {
            return Ok(Arc::clone(plugin));
        }

        let mut inner = self.inner.write();
        // Another caller may have built it between the two locks
        if let Some((cached, plugin)) = inner.instances.get(&transport)
            && *cached == key
        {
            return Ok(Arc::clone(plugin));
        }
        let factory = inner
            .factories
            .iter()
            .find(|f| f.transport_type() == transport)
            .cloned()
            .ok_or_else(|| {
                TetherError::configuration(format!(
                    "No plugin registered for transport '{transport}'"
                ))
            })?;
        let plugin = factory.create(config)?;
        debug!(%transport, config = %key, "Initialized transport plugin");
        if inner
            .instances
            .insert(transport, (key, Arc::clone(&plugin)))
            .is_some()
        {
            debug!(%transport, "Replaced plugin built for a previous configuration");
        }
        Ok(plugin)
    }

    /// Picks the first registered transport whose plugin claims `uri`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no registered plugin supports `uri`.
    pub fn select_for_uri(&self, uri: &str, config: &PluginConfig) -> TetherResult<TransportType> {
        let candidates: Vec<TransportType> = self
            .inner
            .read()
            .factories
            .iter()
            .filter(|f| f.metadata().accepts_scheme(uri))
            .map(|f| f.transport_type())
            .collect();
        for transport in candidates {
            if self
                .get_initialized_plugin(transport, config)?
                .is_supported(uri)
            {
                return Ok(transport);
            }
        }
        Err(TetherError::configuration(format!(
            "No registered transport supports '{uri}'"
        )))
    }

    /// Load plugins from `discovery`, falling back to the static constructors.
    ///
    /// Never fails: discovery errors and empty results trigger the fallback,
    /// and duplicate registrations are skipped.
    pub fn load_defaults(&self, discovery: &dyn PluginDiscovery) -> LoadReport {
        let mut report = LoadReport::default();
        match discovery.discover() {
            Ok(factories) if !factories.is_empty() => {
                report.discovered = factories.len();
                report.registered = self.register_all(factories);
            }
            Ok(_) => {
                warn!("Plugin discovery found nothing, registering built-in plugins");
                report.fallback_used = true;
            }
            Err(e) => {
                warn!(error = %e, "Plugin discovery failed, registering built-in plugins");
                report.fallback_used = true;
            }
        }
        if report.fallback_used {
            report.registered = self.register_builtin();
        }
        info!(
            discovered = report.discovered,
            registered = report.registered,
            fallback = report.fallback_used,
            "Loaded transport plugins"
        );
        report
    }

    /// Register the bundled plugins by calling their constructors directly.
    ///
    /// Returns the number newly registered; already-registered transports are
    /// skipped.
    pub fn register_builtin(&self) -> usize {
        self.register_all(bundled_factories())
    }

    fn register_all(&self, factories: Vec<Arc<dyn PluginFactory>>) -> usize {
        factories
            .into_iter()
            .filter(|factory| match self.register(Arc::clone(factory)) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Skipping plugin");
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_transport_traits::TransportSession;

    #[derive(Debug)]
    struct StubPlugin {
        transport: TransportType,
        scheme: &'static str,
    }

    #[async_trait::async_trait]
    impl TransportPlugin for StubPlugin {
        fn transport_type(&self) -> TransportType {
            self.transport
        }

        fn is_supported(&self, uri: &str) -> bool {
            uri.starts_with(self.scheme)
        }

        async fn connect(&self, _uri: &str) -> TetherResult<Box<dyn TransportSession>> {
            Err(TetherError::transport("stub"))
        }
    }

    #[derive(Debug)]
    struct StubFactory {
        transport: TransportType,
        scheme: &'static str,
        created: AtomicUsize,
    }

    impl StubFactory {
        fn new(transport: TransportType, scheme: &'static str) -> Arc<Self> {
            Arc::new(Self {
                transport,
                scheme,
                created: AtomicUsize::new(0),
            })
        }
    }

    impl PluginFactory for StubFactory {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::new(
                self.transport,
                "stub",
                "0.0.0",
                "test plugin",
                &[self.scheme.trim_end_matches("://")],
            )
        }

        fn create(&self, config: &PluginConfig) -> TetherResult<Arc<dyn TransportPlugin>> {
            if config.get("broken").is_some() {
                return Err(TetherError::configuration("broken config"));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubPlugin {
                transport: self.transport,
                scheme: self.scheme,
            }))
        }
    }

    #[derive(Debug)]
    struct FailingDiscovery;

    impl PluginDiscovery for FailingDiscovery {
        fn discover(&self) -> TetherResult<Vec<Arc<dyn PluginFactory>>> {
            Err(TetherError::configuration("plugin directory not readable"))
        }
    }

    #[derive(Debug)]
    struct EmptyDiscovery;

    impl PluginDiscovery for EmptyDiscovery {
        fn discover(&self) -> TetherResult<Vec<Arc<dyn PluginFactory>>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = PluginRegistry::new();
        registry
            .register(StubFactory::new(TransportType::WebSocket, "ws://"))
            .unwrap();
        let err = registry
            .register(StubFactory::new(TransportType::WebSocket, "ws://"))
            .unwrap_err();
        assert_eq!(err.kind(), tether_protocol::ErrorKind::Configuration);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_plugins_memoized_per_config_shape() {
        let registry = PluginRegistry::new();
        let factory = StubFactory::new(TransportType::WebSocket, "ws://");
        registry.register(factory.clone()).unwrap();

        let a = PluginConfig::from_value(serde_json::json!({"x": 1, "y": 2})).unwrap();
        let b = PluginConfig::from_value(serde_json::json!({"y": 2, "x": 1})).unwrap();
        let c = PluginConfig::from_value(serde_json::json!({"x": 3})).unwrap();

        let first = registry
            .get_initialized_plugin(TransportType::WebSocket, &a)
            .unwrap();
        let second = registry
            .get_initialized_plugin(TransportType::WebSocket, &b)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        registry
            .get_initialized_plugin(TransportType::WebSocket, &c)
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_config_replaces_cached_instance() {
        let registry = PluginRegistry::new();
        let factory = StubFactory::new(TransportType::WebSocket, "ws://");
        registry.register(factory.clone()).unwrap();
        registry
            .register(StubFactory::new(TransportType::Sse, "http://"))
            .unwrap();
        registry
            .get_initialized_plugin(TransportType::Sse, &PluginConfig::new())
            .unwrap();

        // Rotating credentials must not pile up instances
        for n in 0..10 {
            let config = PluginConfig::new().with("auth_token", format!("token-{n}"));
            registry
                .get_initialized_plugin(TransportType::WebSocket, &config)
                .unwrap();
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 10);
        assert_eq!(registry.inner.read().instances.len(), 2);

        // The latest config is still served from the cache
        let latest = PluginConfig::new().with("auth_token", "token-9");
        registry
            .get_initialized_plugin(TransportType::WebSocket, &latest)
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_unknown_transport_and_bad_config() {
        let registry = PluginRegistry::new();
        registry
            .register(StubFactory::new(TransportType::Sse, "http://"))
            .unwrap();
        assert!(
            registry
                .get_initialized_plugin(TransportType::WebSocket, &PluginConfig::new())
                .is_err()
        );
        let broken = PluginConfig::new().with("broken", true);
        assert!(
            registry
                .get_initialized_plugin(TransportType::Sse, &broken)
                .is_err()
        );
    }

    #[test]
    fn test_select_for_uri_follows_registration_order() {
        let registry = PluginRegistry::new();
        registry
            .register(StubFactory::new(TransportType::StreamableHttp, "http://"))
            .unwrap();
        registry
            .register(StubFactory::new(TransportType::Sse, "http://"))
            .unwrap();
        registry
            .register(StubFactory::new(TransportType::WebSocket, "ws://"))
            .unwrap();

        let config = PluginConfig::new();
        assert_eq!(
            registry.select_for_uri("http://localhost/mcp", &config).unwrap(),
            TransportType::StreamableHttp
        );
        assert_eq!(
            registry.select_for_uri("ws://localhost/mcp", &config).unwrap(),
            TransportType::WebSocket
        );
        assert!(registry.select_for_uri("ftp://localhost", &config).is_err());
    }

    #[test]
    fn test_list_available() {
        let registry = PluginRegistry::new();
        registry
            .register(StubFactory::new(TransportType::WebSocket, "ws://"))
            .unwrap();
        let listed = registry.list_available();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].transport_type, TransportType::WebSocket);
        assert!(registry.contains(TransportType::WebSocket));
        assert!(!registry.contains(TransportType::Sse));
    }

    #[test]
    fn test_failed_discovery_falls_back_to_builtin() {
        let registry = PluginRegistry::new();
        let report = registry.load_defaults(&FailingDiscovery);
        assert!(report.fallback_used);
        assert_eq!(report.discovered, 0);
        assert_eq!(report.registered, bundled_factories().len());
        assert_eq!(registry.len(), bundled_factories().len());
    }

    #[test]
    fn test_empty_discovery_falls_back_to_builtin() {
        let registry = PluginRegistry::new();
        let report = registry.load_defaults(&EmptyDiscovery);
        assert!(report.fallback_used);
        assert_eq!(report.registered, bundled_factories().len());
    }

    #[test]
    fn test_builtin_tolerates_existing_registrations() {
        let registry = PluginRegistry::new();
        registry
            .register(StubFactory::new(TransportType::WebSocket, "ws://"))
            .unwrap();
        let expected = bundled_factories()
            .iter()
            .filter(|f| f.transport_type() != TransportType::WebSocket)
            .count();
        assert_eq!(registry.register_builtin(), expected);
        assert_eq!(registry.register_builtin(), 0);
    }

    #[cfg(all(feature = "http", feature = "websocket"))]
    #[test]
    fn test_bundled_discovery_registers_all_transports() {
        let registry = PluginRegistry::new();
        let report = registry.load_defaults(&BundledDiscovery);
        assert!(!report.fallback_used);
        assert_eq!(report.discovered, 3);
        for transport in TransportType::ALL {
            assert!(registry.contains(transport));
        }
        assert_eq!(
            registry
                .select_for_uri("https://example.com/mcp", &PluginConfig::new())
                .unwrap(),
            TransportType::StreamableHttp
        );
    }
}
