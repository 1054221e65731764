//! Control channel wire types.
//!
//! The control protocol is one UTF-8, newline-terminated JSON exchange per
//! loopback TCP connection: the client writes a [`Request`] line, the
//! daemon answers with a [`Response`] line and closes. Requests are capped
//! at 1 KiB. Binary payloads travel base64-encoded inside the `data`
//! object.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum accepted request line length, terminator included.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// Known command names.
pub mod commands {
    pub const STATUS: &str = "status";
    pub const PERSIST: &str = "persist";
    pub const QUIT: &str = "quit";
    pub const SOURCES: &str = "sources";
}

/// One control command with optional string arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub command: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: BTreeMap::new(),
        }
    }
}

/// One control reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            status_code: 200,
            status_text: "OK".to_string(),
            data: Some(data),
        }
    }

    pub fn error(status_code: u16, status_text: impl Into<String>) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            // Response contains only JSON-representable types.
            r#"{"status_code":500,"status_text":"encoding failure"}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// Encode binary payload bytes for the `data` object.
pub fn encode_bytes(bytes: &[u8]) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Decode a base64 payload produced by [`encode_bytes`].
pub fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}
