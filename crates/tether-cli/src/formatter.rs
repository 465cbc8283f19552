//! Output formatting for CLI results

use comfy_table::{Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use owo_colors::OwoColorize;
use serde::Serialize;
use tether_client::{
    CallToolResult, ConnectionEvent, ConnectionEventKind, ConnectionState, ConnectionStatus,
    Primitive,
};

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

/// Renders command results in the selected format
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
    colored: bool,
}

impl Formatter {
    #[must_use]
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    /// Pretty JSON regardless of format
    pub fn display<T: Serialize + ?Sized>(&self, value: &T) -> CliResult<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn display_status(&self, status: &ConnectionStatus) -> CliResult<()> {
        if self.format == OutputFormat::Json {
            return self.display(status);
        }

        let state = status.state.to_string();
        let state = if !self.colored {
            state
        } else {
            match status.state {
                ConnectionState::Connected => state.green().to_string(),
                ConnectionState::Degraded | ConnectionState::Connecting => {
                    state.yellow().to_string()
                }
                ConnectionState::Disconnected | ConnectionState::PermanentlyFailed => {
                    state.red().to_string()
                }
            }
        };
        println!("State:      {state}");
        if let Some(target) = &status.target {
            println!("Target:     {target}");
        }
        if let Some(server) = &status.server {
            println!("Server:     {} {}", server.name, server.version);
        }
        println!("Generation: {}", status.generation);
        if status.failures.consecutive_failures > 0 {
            println!("Failures:   {}", status.failures.consecutive_failures);
        }
        if let Some(error) = &status.failures.last_error {
            println!("Last error: {error}");
        }
        Ok(())
    }

    pub fn display_primitives(&self, primitives: &[&Primitive]) -> CliResult<()> {
        if self.format == OutputFormat::Json {
            return self.display(primitives);
        }
        if primitives.is_empty() {
            println!("No primitives available");
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Kind", "Name", "Description"]);
        for primitive in primitives {
            table.add_row(vec![
                primitive.kind_label(),
                primitive.name(),
                primitive.description().unwrap_or("-"),
            ]);
        }
        println!("{table}");
        println!("Total: {}", primitives.len());
        Ok(())
    }

    pub fn display_tool_result(&self, result: &CallToolResult) -> CliResult<()> {
        if self.format == OutputFormat::Json {
            return self.display(result);
        }
        let text = result.text();
        if text.is_empty() {
            match &result.structured_content {
                Some(structured) => self.display(structured)?,
                None => self.display(&result.content)?,
            }
        } else {
            println!("{text}");
        }
        Ok(())
    }

    /// One line per event: JSON lines or a timestamped summary.
    pub fn display_event(&self, event: &ConnectionEvent) -> CliResult<()> {
        if self.format == OutputFormat::Json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }
        let at = event.at.format("%H:%M:%S%.3f");
        let summary = describe(&event.kind);
        if self.colored && is_failure(&event.kind) {
            println!("{at} {}", summary.red());
        } else {
            println!("{at} {summary}");
        }
        Ok(())
    }

    pub fn display_error(&self, error: &CliError) {
        let label = format!("{} error:", error.category());
        if self.colored {
            eprintln!("{} {error}", label.red().bold());
        } else {
            eprintln!("{label} {error}");
        }
        for suggestion in error.suggestions() {
            eprintln!("  - {suggestion}");
        }
    }
}

fn is_failure(kind: &ConnectionEventKind) -> bool {
    matches!(
        kind,
        ConnectionEventKind::Disconnected { error: Some(_) }
            | ConnectionEventKind::HealthCheck { healthy: false }
            | ConnectionEventKind::ToolCallFailed { .. }
    )
}

/// Human summary of a lifecycle event
pub fn describe(kind: &ConnectionEventKind) -> String {
    match kind {
        ConnectionEventKind::Connecting { uri } => format!("connecting to {uri}"),
        ConnectionEventKind::Connected { uri } => format!("connected to {uri}"),
        ConnectionEventKind::Disconnected { error: None } => "disconnected".to_string(),
        ConnectionEventKind::Disconnected { error: Some(e) } => format!("disconnected: {e}"),
        ConnectionEventKind::HealthCheck { healthy: true } => "health check passed".to_string(),
        ConnectionEventKind::HealthCheck { healthy: false } => "health check failed".to_string(),
        ConnectionEventKind::ToolsListUpdated { count } => {
            format!("primitives refreshed ({count})")
        }
        ConnectionEventKind::ToolCallStarted { name } => format!("calling {name}"),
        ConnectionEventKind::ToolCallCompleted { name, is_error } => {
            if *is_error {
                format!("{name} completed with a tool error")
            } else {
                format!("{name} completed")
            }
        }
        ConnectionEventKind::ToolCallFailed { name, kind, error } => {
            format!("{name} failed ({kind}): {error}")
        }
    }
}
