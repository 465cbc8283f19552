//! Command execution on top of the connection manager

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tether_client::{
    BundledDiscovery, ConnectionManager, PluginRegistry, Primitive,
    RetryPolicy, ToolArguments, connect_with_retry,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cli::{Commands, Connection, OutputFormat, RetryArgs};
use crate::error::{CliError, CliResult};
use crate::formatter::Formatter;
use crate::settings::Settings;

/// Executes CLI commands against one connection manager
#[derive(Debug)]
pub struct CommandExecutor {
    pub formatter: Formatter,
    settings: Settings,
    registry: Arc<PluginRegistry>,
}

impl CommandExecutor {
    /// Build an executor and load the bundled transport plugins.
    #[must_use]
    pub fn new(settings: Settings, format: OutputFormat, colored: bool) -> Self {
        let registry = PluginRegistry::new();
        let report = registry.load_defaults(&BundledDiscovery);
        debug!(?report, transports = ?registry.list_available(), "Plugin registry ready");
        Self {
            formatter: Formatter::new(format, colored),
            settings,
            registry: Arc::new(registry),
        }
    }

    /// Execute a command. The manager is shut down before returning.
    pub async fn execute(&self, command: Commands) -> CliResult<()> {
        let manager =
            ConnectionManager::new(self.settings.manager.clone(), Arc::clone(&self.registry))?;
        manager.init()?;
        let result = self.dispatch(&manager, command).await;
        manager.shutdown().await;
        result
    }

    async fn dispatch(&self, manager: &ConnectionManager, command: Commands) -> CliResult<()> {
        match command {
            Commands::Connect { conn, retry } => {
                self.connect(manager, &conn, &retry).await?;
                self.formatter.display_status(&manager.status())
            }

            Commands::List { conn, kind } => {
                self.connect(manager, &conn, &RetryArgs::none()).await?;
                let snapshot = manager.get_primitives(false).await?;
                let primitives: Vec<&Primitive> = snapshot
                    .primitives()
                    .iter()
                    .filter(|p| kind.is_none_or(|k| p.kind_label() == k.label()))
                    .collect();
                self.formatter.display_primitives(&primitives)
            }

            Commands::Call {
                conn,
                name,
                arguments,
            } => {
                let arguments = parse_arguments(&arguments)?;
                self.connect(manager, &conn, &RetryArgs::none()).await?;
                let result = manager.call_tool(&name, arguments).await?;
                self.formatter.display_tool_result(&result)?;
                if result.is_error {
                    return Err(CliError::ToolReportedError(name));
                }
                Ok(())
            }

            Commands::Watch {
                conn,
                retry,
                interval,
                duration,
            } => {
                self.watch(manager, &conn, &retry, interval, duration)
                    .await
            }
        }
    }

    async fn connect(
        &self,
        manager: &ConnectionManager,
        conn: &Connection,
        retry: &RetryArgs,
    ) -> CliResult<()> {
        let request = self.settings.request(conn, &self.registry)?;
        info!(uri = %request.uri, transport = %request.transport, "Connecting");
        connect_with_retry(manager, request, &retry.policy()).await?;
        Ok(())
    }

    /// Print lifecycle events, keeping the connection alive with periodic
    /// `ensure_connection` calls, until Ctrl-C or `duration` elapses.
    async fn watch(
        &self,
        manager: &ConnectionManager,
        conn: &Connection,
        retry: &RetryArgs,
        interval: u64,
        duration: Option<u64>,
    ) -> CliResult<()> {
        // Subscribed first so the connect events are buffered and printed
        let mut events = manager.subscribe();
        self.connect(manager, conn, retry).await?;

        let mut keep_alive = tokio::time::interval(Duration::from_secs(interval.max(1)));
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.tick().await;

        let deadline = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.formatter.display_event(&event)?,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = keep_alive.tick() => {
                    if let Err(e) = manager.ensure_connection().await {
                        warn!(error = %e, "Keep-alive reconnect failed");
                    }
                }
                () = &mut deadline => return Ok(()),
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
            }
        }
    }
}

impl RetryArgs {
    /// Single attempt
    #[must_use]
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff_ms: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        if self.retries == 0 {
            return RetryPolicy::Never;
        }
        let base = Duration::from_millis(self.backoff_ms.max(1));
        RetryPolicy::Exponential {
            base,
            max_delay: base.saturating_mul(32),
            max_attempts: Some(self.retries),
        }
    }
}

/// Parse a JSON object of tool arguments. Empty input means no arguments.
pub fn parse_arguments(raw: &str) -> CliResult<ToolArguments> {
    if raw.trim().is_empty() {
        return Ok(ToolArguments::new());
    }
    serde_json::from_str::<HashMap<String, serde_json::Value>>(raw)
        .map_err(|e| CliError::InvalidArguments(format!("Invalid JSON arguments: {e}")))
}
