//! Settings and error mapping shared by both HTTP plugins.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tether_protocol::jsonrpc::PARSE_ERROR;
use tether_protocol::{PROTOCOL_VERSION, TetherError, TetherResult};
use tether_transport_traits::{DEFAULT_REQUEST_TIMEOUT, PluginConfig};
use url::Url;

/// Session header used by streamable HTTP servers.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";
/// Protocol revision header sent after the handshake.
pub const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Connection-level bound for establishing TCP/TLS.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings derived from a [`PluginConfig`].
#[derive(Debug, Clone)]
pub(crate) struct HttpSettings {
    pub(crate) headers: HeaderMap,
    pub(crate) request_timeout: Duration,
    pub(crate) protocol_version: String,
}

impl HttpSettings {
    pub(crate) fn from_config(config: &PluginConfig) -> TetherResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.headers()? {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TetherError::configuration(format!("Invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|e| {
                TetherError::configuration(format!("Invalid value for header '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }
        if let Some(token) = config.auth_token()? {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TetherError::configuration(format!("Invalid auth token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(Self {
            headers,
            request_timeout: config.request_timeout()?.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            protocol_version: config
                .protocol_version()?
                .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
        })
    }

    /// Builds a client without a whole-request timeout so long-lived
    /// event streams stay open; individual requests set their own bound.
    pub(crate) fn build_client(&self) -> TetherResult<reqwest::Client> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(self.headers.clone())
            .build()
            .map_err(|e| TetherError::configuration(format!("Failed to build HTTP client: {e}")))
    }
}

/// Parses `uri` and checks it is an `http`/`https` URL.
pub(crate) fn parse_http_uri(uri: &str) -> TetherResult<Url> {
    let url = Url::parse(uri)
        .map_err(|e| TetherError::configuration(format!("Malformed URI '{uri}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TetherError::configuration(format!(
            "Unsupported scheme '{other}' for HTTP transport"
        ))),
    }
}

/// Returns `true` if `uri` parses as an `http`/`https` URL.
pub(crate) fn is_http_uri(uri: &str) -> bool {
    parse_http_uri(uri).is_ok()
}

/// Maps a reqwest failure onto the tagged error type.
pub(crate) fn map_reqwest_error(err: &reqwest::Error, operation: &str, bound: Duration) -> TetherError {
    if err.is_timeout() {
        TetherError::timeout(operation, bound)
    } else if err.is_builder() {
        TetherError::configuration(format!("Invalid request: {err}"))
    } else if err.is_decode() {
        TetherError::Tool {
            code: Some(PARSE_ERROR),
            message: format!("Malformed response body: {err}"),
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TetherError::transport(describe_chain(err))
    } else {
        TetherError::from_message(describe_chain(err))
    }
}

/// Maps a non-success HTTP status onto the tagged error type.
///
/// `had_session` distinguishes an expired session (connection-shaped) from
/// a wrong endpoint path (configuration).
pub(crate) fn status_error(status: StatusCode, body: &str, had_session: bool) -> TetherError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status.as_u16() {
        401 | 403 => TetherError::configuration(format!("Server rejected credentials ({detail})")),
        404 if had_session => TetherError::transport(format!("Session expired ({detail})")),
        404 => TetherError::configuration(format!("Endpoint not found ({detail})")),
        408 | 429 => TetherError::transport(format!("Server unavailable ({detail})")),
        s if s >= 500 => TetherError::transport(format!("Server error ({detail})")),
        _ => TetherError::tool(format!("Request rejected ({detail})")),
    }
}

fn describe_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    message
}
