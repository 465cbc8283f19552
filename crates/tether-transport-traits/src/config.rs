//! Per-plugin configuration.
//!
//! The connection manager treats plugin configuration as opaque. Bundled
//! plugins read a small set of well-known keys through the typed getters
//! below; unknown keys are ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_protocol::{TetherError, TetherResult};

/// Key holding an object of extra request headers.
pub const HEADERS_KEY: &str = "headers";
/// Key holding a bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";
/// Key holding a per-request timeout in milliseconds.
pub const REQUEST_TIMEOUT_KEY: &str = "request_timeout_ms";
/// Key overriding the protocol revision sent during the handshake.
pub const PROTOCOL_VERSION_KEY: &str = "protocol_version";

/// Opaque string-keyed plugin configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig {
    values: Map<String, Value>,
}

impl PluginConfig {
    /// Create an empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a JSON value. `null` yields an empty config.
    pub fn from_value(value: Value) -> TetherResult<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(values) => Ok(Self { values }),
            other => Err(TetherError::configuration(format!(
                "Plugin configuration must be an object, got {other}"
            ))),
        }
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw access to a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns `true` if no keys are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stable string form with object keys sorted at every depth.
    ///
    /// Two configurations with the same shape produce the same key regardless
    /// of insertion order.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        write_canonical(&Value::Object(self.values.clone()), &mut out);
        out
    }

    /// Extra request headers.
    pub fn headers(&self) -> TetherResult<Vec<(String, String)>> {
        let Some(value) = self.values.get(HEADERS_KEY) else {
            return Ok(Vec::new());
        };
        let Value::Object(map) = value else {
            return Err(wrong_type(HEADERS_KEY, "an object of strings"));
        };
        map.iter()
            .map(|(name, value)| match value {
                Value::String(s) => Ok((name.clone(), s.clone())),
                _ => Err(wrong_type(HEADERS_KEY, "an object of strings")),
            })
            .collect()
    }

    /// Bearer token, if configured.
    pub fn auth_token(&self) -> TetherResult<Option<String>> {
        self.optional_string(AUTH_TOKEN_KEY)
    }

    /// Protocol revision override, if configured.
    pub fn protocol_version(&self) -> TetherResult<Option<String>> {
        self.optional_string(PROTOCOL_VERSION_KEY)
    }

    /// Per-request timeout, if configured.
    pub fn request_timeout(&self) -> TetherResult<Option<Duration>> {
        match self.values.get(REQUEST_TIMEOUT_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match value.as_u64() {
                Some(0) | None => Err(wrong_type(
                    REQUEST_TIMEOUT_KEY,
                    "a positive integer of milliseconds",
                )),
                Some(ms) => Ok(Some(Duration::from_millis(ms))),
            },
        }
    }

    fn optional_string(&self, key: &str) -> TetherResult<Option<String>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key, "a string")),
        }
    }
}

fn wrong_type(key: &str, expected: &str) -> TetherError {
    TetherError::configuration(format!("Plugin config key '{key}' must be {expected}"))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
