//! # Tether CLI
//!
//! Command-line client for MCP-style tool servers, built on
//! `tether-client`'s connection manager.
//!
//! ## Usage
//!
//! ```bash
//! # Connect and report the server and connection status
//! tether connect --uri http://localhost:8080/mcp
//!
//! # List tools only, transport chosen from the URI
//! tether list --uri ws://localhost:9000/mcp --kind tool
//!
//! # Call a tool with arguments
//! tether call --uri http://localhost:8080/mcp add --arguments '{"a": 5, "b": 3}'
//!
//! # Print lifecycle events for ten minutes as JSON lines
//! tether watch --config tether.toml --format json --duration 600
//! ```

pub mod cli;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod logging;
pub mod settings;

use clap::Parser;

pub use cli::{Cli, Commands, Connection, OutputFormat};
pub use error::{CliError, CliResult, ErrorCategory};
pub use executor::CommandExecutor;
pub use formatter::Formatter;
pub use settings::Settings;

/// Parse arguments, set up logging and settings, and run the command.
///
/// Errors are displayed with hints before being returned.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let formatter = Formatter::new(cli.format, !cli.no_color);
    let result = execute(cli).await;
    if let Err(e) = &result {
        formatter.display_error(e);
    }
    result
}

async fn execute(cli: Cli) -> CliResult<()> {
    logging::init(cli.verbose, cli.json_logs)?;
    let settings = Settings::load(cli.config.as_deref())?;
    CommandExecutor::new(settings, cli.format, !cli.no_color)
        .execute(cli.command)
        .await
}
