//! Core protocol and transport types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TetherError;

/// Protocol revision advertised during the handshake.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Tool call arguments. String keys, no ordering guarantees.
pub type ToolArguments = HashMap<String, Value>;

/// Enumerates the wire transports a plugin can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// Legacy HTTP + Server-Sent Events (event-stream).
    Sse,
    /// WebSocket (socket).
    #[serde(rename = "websocket")]
    WebSocket,
    /// Streamable HTTP.
    StreamableHttp,
}

impl TransportType {
    /// All transport types, in selection priority order.
    pub const ALL: [Self; 3] = [Self::StreamableHttp, Self::Sse, Self::WebSocket];
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sse => write!(f, "sse"),
            Self::WebSocket => write!(f, "websocket"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

impl FromStr for TransportType {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse" | "event-stream" => Ok(Self::Sse),
            "websocket" | "ws" | "socket" => Ok(Self::WebSocket),
            "streamable-http" | "streamable_http" | "streamablehttp" | "http" => {
                Ok(Self::StreamableHttp)
            }
            other => Err(TetherError::configuration(format!(
                "Unknown transport type '{other}' (expected sse, websocket or streamable-http)"
            ))),
        }
    }
}

/// A tool advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPrimitive {
    /// Tool name
    pub name: String,
    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's arguments
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// A resource advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePrimitive {
    /// Resource name
    pub name: String,
    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resource URI
    pub uri: String,
    /// Optional MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One argument accepted by a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied
    #[serde(default)]
    pub required: bool,
}

/// A prompt advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPrimitive {
    /// Prompt name
    pub name: String,
    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A tool, resource or prompt advertised by the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Primitive {
    /// A callable tool
    Tool(ToolPrimitive),
    /// A readable resource
    Resource(ResourcePrimitive),
    /// A prompt template
    Prompt(PromptPrimitive),
}

impl Primitive {
    /// Name of the primitive regardless of kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Tool(t) => &t.name,
            Self::Resource(r) => &r.name,
            Self::Prompt(p) => &p.name,
        }
    }

    /// Optional description regardless of kind.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Tool(t) => t.description.as_deref(),
            Self::Resource(r) => r.description.as_deref(),
            Self::Prompt(p) => p.description.as_deref(),
        }
    }

    /// Lowercase kind label ("tool", "resource", "prompt").
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Tool(_) => "tool",
            Self::Resource(_) => "resource",
            Self::Prompt(_) => "prompt",
        }
    }
}

/// Result of a successful `tools/call`.
///
/// `is_error` reports a failure *inside* the tool; the call itself succeeded
/// and the connection is unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks returned by the tool
    #[serde(default)]
    pub content: Vec<Value>,
    /// Whether the tool reported an execution error
    #[serde(default)]
    pub is_error: bool,
    /// Optional structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Concatenate all text content blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Capability categories a server advertises during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Present when the server offers tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Present when the server offers resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Present when the server offers prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

/// Server identity reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    #[serde(default)]
    pub version: String,
}

/// Result of the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server agreed to
    pub protocol_version: String,
    /// Advertised capability categories
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity
    #[serde(default)]
    pub server_info: ServerInfo,
    /// Optional usage instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::Sse.to_string(), "sse");
        assert_eq!(TransportType::WebSocket.to_string(), "websocket");
        assert_eq!(TransportType::StreamableHttp.to_string(), "streamable-http");
    }

    #[test]
    fn test_transport_type_serde_matches_display() {
        for transport in TransportType::ALL {
            let value = serde_json::to_value(transport).unwrap();
            assert_eq!(value, json!(transport.to_string()));
        }
    }

    #[test]
    fn test_transport_type_from_str() {
        assert_eq!("SSE".parse::<TransportType>().unwrap(), TransportType::Sse);
        assert_eq!("ws".parse::<TransportType>().unwrap(), TransportType::WebSocket);
        assert_eq!(
            "streamable-http".parse::<TransportType>().unwrap(),
            TransportType::StreamableHttp
        );
        assert!("carrier-pigeon".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_tool_primitive_deserializes_mcp_shape() {
        let tool: ToolPrimitive = serde_json::from_value(json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}}}
        }))
        .unwrap();
        assert_eq!(tool.name, "add");
        assert_eq!(tool.input_schema["properties"]["a"]["type"], "number");
    }

    #[test]
    fn test_primitive_tagging() {
        let prompt = Primitive::Prompt(PromptPrimitive {
            name: "summarize".into(),
            description: None,
            arguments: vec![PromptArgument {
                name: "text".into(),
                description: None,
                required: true,
            }],
        });
        let value = serde_json::to_value(&prompt).unwrap();
        assert_eq!(value["kind"], "prompt");
        assert_eq!(prompt.kind_label(), "prompt");
        assert_eq!(prompt.name(), "summarize");
    }

    #[test]
    fn test_call_tool_result_text() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "a"}, {"type": "image", "data": "..."}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "a\nb");
    }
}
