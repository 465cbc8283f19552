//! CLI argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tether_client::TransportType;

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Resilient client for MCP-style tool servers",
    long_about = "Connects to a tool server over streamable HTTP, the legacy event-stream \
                  transport or WebSocket, lists its tools, resources and prompts, calls \
                  tools and watches connection lifecycle events.\n\n\
                  Settings are layered: an optional config file, then TETHER_* environment \
                  variables (nested keys use '__', e.g. TETHER_MANAGER__CONNECT_TIMEOUT=5000), \
                  then command-line flags."
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (TOML, YAML or JSON)
    #[arg(long, short = 'c', global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "human")]
    pub format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect, report the server and connection status, then disconnect
    Connect {
        #[command(flatten)]
        conn: Connection,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// List tools, resources and prompts
    List {
        #[command(flatten)]
        conn: Connection,

        /// Only show one kind of primitive
        #[arg(long, short = 'k', value_enum)]
        kind: Option<PrimitiveKind>,
    },

    /// Call a tool
    Call {
        #[command(flatten)]
        conn: Connection,

        /// Tool name
        name: String,

        /// Arguments as JSON object
        #[arg(long, short = 'a', default_value = "{}")]
        arguments: String,
    },

    /// Stay connected and print lifecycle events until interrupted
    Watch {
        #[command(flatten)]
        conn: Connection,

        #[command(flatten)]
        retry: RetryArgs,

        /// Seconds between keep-alive checks of the connection
        #[arg(long, default_value_t = 15)]
        interval: u64,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
}

/// Connection target options, layered over the config file and environment
#[derive(Args, Debug, Clone, Default)]
pub struct Connection {
    /// Server URI (http://, https://, ws:// or wss://)
    #[arg(long, short = 'u')]
    pub uri: Option<String>,

    /// Transport to use (streamable-http, sse, websocket); chosen from the URI when omitted
    #[arg(long, short = 't')]
    pub transport: Option<TransportType>,

    /// Plugin configuration as a JSON object
    #[arg(long)]
    pub plugin_config: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "TETHER_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,
}

/// Retry behaviour for the initial connection
#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    /// Connection attempts after the first before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Initial backoff in milliseconds, doubled per attempt
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and plain text
    Human,
    /// Pretty-printed JSON
    Json,
}

/// Primitive kind filter for `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrimitiveKind {
    /// Tools only
    Tool,
    /// Resources only
    Resource,
    /// Prompts only
    Prompt,
}

impl PrimitiveKind {
    /// Label matching `Primitive::kind_label`
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call() {
        let cli = Cli::try_parse_from([
            "tether",
            "call",
            "--uri",
            "ws://localhost:9000/mcp",
            "-t",
            "websocket",
            "echo",
            "-a",
            r#"{"text":"hi"}"#,
        ])
        .unwrap();

        match cli.command {
            Commands::Call {
                conn,
                name,
                arguments,
            } => {
                assert_eq!(conn.uri.as_deref(), Some("ws://localhost:9000/mcp"));
                assert_eq!(conn.transport, Some(TransportType::WebSocket));
                assert_eq!(name, "echo");
                assert_eq!(arguments, r#"{"text":"hi"}"#);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["tether", "-vv", "list", "--kind", "tool"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::List {
                kind: Some(PrimitiveKind::Tool),
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_transport() {
        let result = Cli::try_parse_from(["tether", "list", "--transport", "carrier-pigeon"]);
        assert!(result.is_err());
    }
}
