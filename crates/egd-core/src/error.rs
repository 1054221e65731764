//! Error taxonomy shared by every component.
//!
//! Every failure carries a recovery category, the component it originated
//! in, a stable machine-readable code, and a human message. The category
//! drives the failure policy: temporary and permanent errors fail a single
//! source cycle, fatal errors abort daemon startup or shutdown.

use std::fmt;

/// How an error is expected to be recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transient condition; the same operation may succeed on the next cycle.
    Temporary,
    /// Condition tied to a specific source or input; retries will keep
    /// failing until the operator intervenes.
    Permanent,
    /// The daemon cannot (or must not) continue.
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary => write!(f, "temporary"),
            Self::Permanent => write!(f, "permanent"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Component tag identifying where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Pool,
    Storage,
    Source,
    Scheduler,
    Control,
    Lock,
    Config,
    Client,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool => write!(f, "pool"),
            Self::Storage => write!(f, "storage"),
            Self::Source => write!(f, "source"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Control => write!(f, "control"),
            Self::Lock => write!(f, "lock"),
            Self::Config => write!(f, "config"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// An error with category, component tag, stable code and optional cause.
#[derive(Debug, thiserror::Error)]
#[error("[{component}/{code}] {message}")]
pub struct EgdError {
    pub category: ErrorCategory,
    pub component: Component,
    pub code: &'static str,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EgdError {
    pub fn new(
        category: ErrorCategory,
        component: Component,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            component,
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn temporary(component: Component, code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Temporary, component, code, message)
    }

    pub fn permanent(component: Component, code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, component, code, message)
    }

    pub fn fatal(component: Component, code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Fatal, component, code, message)
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.category == ErrorCategory::Fatal
    }
}

/// Stable error codes referenced across the codebase and in tests.
pub mod codes {
    pub const DAEMON_ALREADY_RUNNING: &str = "DAEMON_ALREADY_RUNNING";
    pub const LOCK_IO: &str = "LOCK_IO";
    pub const STORAGE_CORRUPTED: &str = "STORAGE_CORRUPTED";
    pub const STORAGE_IO: &str = "STORAGE_IO";
    pub const STORAGE_VERSION: &str = "STORAGE_VERSION";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const CONFIG_IO: &str = "CONFIG_IO";
    pub const CONTROL_PORT_IN_USE: &str = "CONTROL_PORT_IN_USE";
    pub const CONTROL_IO: &str = "CONTROL_IO";
    pub const FETCH_TIMEOUT: &str = "FETCH_TIMEOUT";
    pub const FETCH_HTTP: &str = "FETCH_HTTP";
    pub const FETCH_SHORT: &str = "FETCH_SHORT";
    pub const FETCH_FILE: &str = "FETCH_FILE";
    pub const FETCH_COMMAND: &str = "FETCH_COMMAND";
    pub const FETCH_SCRIPT: &str = "FETCH_SCRIPT";
    pub const DECOMPRESS_FAILED: &str = "DECOMPRESS_FAILED";
    pub const SCRIPT_TIMEOUT: &str = "SCRIPT_TIMEOUT";
    pub const SCRIPT_OVERFLOW: &str = "SCRIPT_OVERFLOW";
    pub const FINAL_PERSIST_FAILED: &str = "FINAL_PERSIST_FAILED";
    pub const CLIENT_UNREACHABLE: &str = "CLIENT_UNREACHABLE";
    pub const CLIENT_TIMEOUT: &str = "CLIENT_TIMEOUT";
    pub const CLIENT_PROTOCOL: &str = "CLIENT_PROTOCOL";
}
