//! Configuration schema, parsing and validation.
//!
//! The daemon is configured from a single TOML file: global pool and
//! control settings at the top level, one `[sources.<name>]` table per
//! entropy source. Durations are humantime strings (`"10m"`, `"90s"`).
//! Unknown scalar keys on a source are kept as custom values and exported
//! to script children as `EGD_SOURCE_<KEY>` environment variables.
//!
//! All validation failures are fatal configuration errors; the daemon
//! refuses to start on any of them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{codes, Component, EgdError};

/// Floor for per-source intervals and the persistence interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Ceiling for the persistence interval.
pub const MAX_PERSIST_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Number of consecutive failed cycles after which a source is disabled.
pub const DISABLE_THRESHOLD: u32 = 5;

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for a tracing `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_filter())
    }
}

// ---------------------------------------------------------------------------
// Custom per-source values
// ---------------------------------------------------------------------------

/// Operator-defined scalar attached to a source.
///
/// The configuration language is open-ended here; only scalars are
/// accepted, and each stringifies deterministically for the child
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Duration fields as humantime strings
// ---------------------------------------------------------------------------

mod duration_str {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S: Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*v).to_string())
    }
}

mod opt_duration_str {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let s = Option::<String>::deserialize(d)?;
        s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&humantime::format_duration(*d).to_string()),
            None => s.serialize_none(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source specification
// ---------------------------------------------------------------------------

/// The data-acquisition method of a validated source.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Url(String),
    File(PathBuf),
    Command(Vec<String>),
    Script { interpreter: String, body: String },
}

impl Acquisition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::File(_) => "file",
            Self::Command(_) => "command",
            Self::Script { .. } => "script",
        }
    }
}

/// Static configuration of one entropy source, keyed by a unique name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Unique source name, taken from the `[sources.<name>]` table key.
    #[serde(skip)]
    pub name: String,

    /// Minimum wall-clock gap between successive cycles.
    #[serde(with = "duration_str")]
    pub interval: Duration,

    /// A-priori estimate of effective entropy per produced byte, in [0, 1].
    pub scale: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Truncate fetched samples to this many bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Reject samples shorter than this as fetch failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    /// Skip the compression stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_compress: Option<bool>,
    /// Delay before the first cycle after daemon startup.
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub init_delay: Option<Duration>,
    /// URL fetched and discarded before the main fetch (URL sources only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<String>,
    /// Configured but never scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    /// Accept invalid TLS certificates for this source's URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_tls: Option<bool>,

    /// Operator-defined scalar keys, exported to script children.
    #[serde(flatten)]
    pub custom: BTreeMap<String, CustomValue>,
}

impl SourceSpec {
    pub fn no_compress(&self) -> bool {
        self.no_compress.unwrap_or(false)
    }

    pub fn disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }

    pub fn insecure_tls(&self) -> bool {
        self.insecure_tls.unwrap_or(false)
    }

    /// The single configured acquisition method. Only meaningful after
    /// validation, which guarantees exactly one is present.
    pub fn acquisition(&self) -> Acquisition {
        if let Some(url) = &self.url {
            Acquisition::Url(url.clone())
        } else if let Some(file) = &self.file {
            Acquisition::File(file.clone())
        } else if let Some(command) = &self.command {
            Acquisition::Command(command.clone())
        } else {
            Acquisition::Script {
                interpreter: self.script_interpreter.clone().unwrap_or_default(),
                body: self.script.clone().unwrap_or_default(),
            }
        }
    }

    /// Every configured key as an `EGD_SOURCE_<KEY>` environment pair,
    /// uppercased, stringified deterministically.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = Vec::new();
        let mut push = |key: &str, value: String| {
            vars.push((format!("EGD_SOURCE_{}", key.to_uppercase()), value));
        };

        push("name", self.name.clone());
        push("interval", humantime::format_duration(self.interval).to_string());
        push("scale", self.scale.to_string());
        if let Some(v) = &self.url {
            push("url", v.clone());
        }
        if let Some(v) = &self.file {
            push("file", v.display().to_string());
        }
        if let Some(v) = &self.command {
            push("command", v.join(" "));
        }
        if let Some(v) = &self.script_interpreter {
            push("script_interpreter", v.clone());
        }
        if let Some(v) = &self.script {
            push("script", v.clone());
        }
        if let Some(v) = self.size {
            push("size", v.to_string());
        }
        if let Some(v) = self.min_size {
            push("min_size", v.to_string());
        }
        if let Some(v) = self.no_compress {
            push("no_compress", v.to_string());
        }
        if let Some(v) = self.init_delay {
            push("init_delay", humantime::format_duration(v).to_string());
        }
        if let Some(v) = &self.prefetch {
            push("prefetch", v.clone());
        }
        if let Some(v) = self.disabled {
            push("disabled", v.to_string());
        }
        if let Some(v) = self.insecure_tls {
            push("insecure_tls", v.to_string());
        }
        for (key, value) in &self.custom {
            push(key, value.to_string());
        }
        vars
    }

    fn validate(&self, name: &str) -> Result<(), EgdError> {
        let mut methods = 0;
        if self.url.is_some() {
            methods += 1;
        }
        if self.file.is_some() {
            methods += 1;
        }
        if self.command.is_some() {
            methods += 1;
        }
        match (&self.script, &self.script_interpreter) {
            (Some(_), Some(_)) => methods += 1,
            (Some(_), None) => {
                return Err(invalid(format!(
                    "source '{name}': script requires script_interpreter"
                )));
            }
            (None, Some(_)) => {
                return Err(invalid(format!(
                    "source '{name}': script_interpreter requires script"
                )));
            }
            (None, None) => {}
        }
        if methods != 1 {
            return Err(invalid(format!(
                "source '{name}': exactly one of url, file, command or script is required \
                 ({methods} configured)"
            )));
        }

        if self.prefetch.is_some() && self.url.is_none() {
            return Err(invalid(format!(
                "source '{name}': prefetch is only valid for url sources"
            )));
        }
        if let Some(command) = &self.command {
            if command.is_empty() {
                return Err(invalid(format!("source '{name}': command must not be empty")));
            }
        }
        if self.interval < MIN_INTERVAL {
            return Err(invalid(format!(
                "source '{name}': interval must be at least {}",
                humantime::format_duration(MIN_INTERVAL)
            )));
        }
        if !(0.0..=1.0).contains(&self.scale) {
            return Err(invalid(format!(
                "source '{name}': scale must be in [0.0, 1.0], got {}",
                self.scale
            )));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.size) {
            if min > max {
                return Err(invalid(format!(
                    "source '{name}': min_size ({min}) exceeds size ({max})"
                )));
            }
        }
        if self.size == Some(0) {
            return Err(invalid(format!("source '{name}': size must be positive")));
        }

        for key in self.custom.keys() {
            if !is_env_safe(key) {
                return Err(invalid(format!(
                    "source '{name}': custom key '{key}' is not environment-safe \
                     (use letters, digits and underscores, not starting with a digit)"
                )));
            }
        }
        Ok(())
    }
}

/// A key is env-safe if its uppercase form is a valid environment variable
/// name fragment.
fn is_env_safe(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Pool byte ceiling.
    pub max_entropy: u64,

    /// Pool image path, tilde-expanded.
    pub persist_file: PathBuf,

    /// Gap between background persists, in [10 s, 24 h].
    #[serde(with = "duration_str")]
    pub persist_interval: Duration,

    /// Capacity of each pool chunk.
    pub pool_chunk_max_entropy: u64,

    /// Loopback control port.
    pub tcp_port: u16,

    /// Lock file path; defaults to the platform temp location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,
}

impl Config {
    /// Parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, EgdError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EgdError::fatal(
                Component::Config,
                codes::CONFIG_IO,
                format!("cannot read configuration file {}", path.display()),
            )
            .with_cause(e)
        })?;
        Self::from_str(&text)
    }

    /// Parse and validate configuration text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, EgdError> {
        let mut config: Config = toml::from_str(text)
            .map_err(|e| invalid(format!("configuration parse error: {e}")))?;
        config.finalize()?;
        Ok(config)
    }

    /// Fill derived fields and run the full validation pass.
    fn finalize(&mut self) -> Result<(), EgdError> {
        if self.max_entropy == 0 {
            return Err(invalid("max_entropy must be positive"));
        }
        if self.pool_chunk_max_entropy == 0 {
            return Err(invalid("pool_chunk_max_entropy must be positive"));
        }
        if self.tcp_port == 0 {
            return Err(invalid("tcp_port must be in 1..=65535"));
        }
        if self.persist_interval < MIN_INTERVAL {
            return Err(invalid(format!(
                "persist_interval must be at least {}",
                humantime::format_duration(MIN_INTERVAL)
            )));
        }
        if self.persist_interval > MAX_PERSIST_INTERVAL {
            return Err(invalid(format!(
                "persist_interval must be at most {}",
                humantime::format_duration(MAX_PERSIST_INTERVAL)
            )));
        }
        if self.persist_file.as_os_str().is_empty() {
            return Err(invalid("persist_file must not be empty"));
        }
        self.persist_file = expand_tilde(&self.persist_file);
        if let Some(lock) = &self.lock_file {
            self.lock_file = Some(expand_tilde(lock));
        }

        for (name, spec) in self.sources.iter_mut() {
            spec.name = name.clone();
            spec.validate(name)?;
        }
        Ok(())
    }

    /// Lock file path, falling back to the platform default.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file.clone().unwrap_or_else(default_lock_path)
    }

    /// Sources that are not statically disabled, in name order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceSpec> {
        self.sources.values().filter(|s| !s.disabled())
    }
}

/// Platform default lock file location, owner-only.
pub fn default_lock_path() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/egd.lck")
    }
    #[cfg(not(unix))]
    {
        std::env::temp_dir().join("egd.lck")
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn invalid(message: impl Into<String>) -> EgdError {
    EgdError::fatal(Component::Config, codes::CONFIG_INVALID, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        log_level = "debug"
        max_entropy = 1048576
        persist_file = "/var/lib/egd/pool.egd"
        persist_interval = "5m"
        pool_chunk_max_entropy = 65536
        tcp_port = 7787
    "#;

    fn with_source(body: &str) -> String {
        format!("{BASE}\n[sources.test]\n{body}")
    }

    #[test]
    fn test_minimal_config_parses() {
        let config = Config::from_str(BASE).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.max_entropy, 1_048_576);
        assert_eq!(config.persist_interval, Duration::from_secs(300));
        assert_eq!(config.tcp_port, 7787);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_url_source_parses() {
        let text = with_source(
            r#"
            url = "https://example.com/noise"
            interval = "10m"
            scale = 0.25
            size = 4096
            min_size = 128
            prefetch = "https://example.com/"
            "#,
        );
        let config = Config::from_str(&text).unwrap();
        let spec = &config.sources["test"];
        assert_eq!(spec.name, "test");
        assert_eq!(spec.acquisition(), Acquisition::Url("https://example.com/noise".into()));
        assert_eq!(spec.interval, Duration::from_secs(600));
        assert_eq!(spec.size, Some(4096));
    }

    #[test]
    fn test_custom_keys_are_collected() {
        let text = with_source(
            r#"
            file = "/dev/hwrng"
            interval = "30s"
            scale = 1.0
            crystal = "quartz"
            attempts = 3
            factor = 0.5
            verbose = true
            "#,
        );
        let config = Config::from_str(&text).unwrap();
        let spec = &config.sources["test"];
        assert_eq!(spec.custom["crystal"], CustomValue::String("quartz".into()));
        assert_eq!(spec.custom["attempts"], CustomValue::Integer(3));
        assert_eq!(spec.custom["verbose"], CustomValue::Bool(true));
    }

    #[test]
    fn test_env_vars_are_prefixed_and_uppercased() {
        let text = with_source(
            r#"
            script_interpreter = "/bin/sh"
            script = "date +%N"
            interval = "1m"
            scale = 0.1
            crystal = "quartz"
            "#,
        );
        let config = Config::from_str(&text).unwrap();
        let vars = config.sources["test"].env_vars();
        let find = |k: &str| {
            vars.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(find("EGD_SOURCE_NAME").unwrap(), "test");
        assert_eq!(find("EGD_SOURCE_INTERVAL").unwrap(), "1m");
        assert_eq!(find("EGD_SOURCE_SCALE").unwrap(), "0.1");
        assert_eq!(find("EGD_SOURCE_CRYSTAL").unwrap(), "quartz");
        assert_eq!(find("EGD_SOURCE_SCRIPT_INTERPRETER").unwrap(), "/bin/sh");
    }

    #[test]
    fn test_zero_methods_rejected() {
        let text = with_source("interval = \"1m\"\nscale = 0.5");
        let err = Config::from_str(&text).unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        assert!(err.message.contains("exactly one"));
    }

    #[test]
    fn test_two_methods_rejected() {
        let text = with_source(
            r#"
            url = "https://example.com"
            file = "/dev/urandom"
            interval = "1m"
            scale = 0.5
            "#,
        );
        assert!(Config::from_str(&text).is_err());
    }

    #[test]
    fn test_script_without_interpreter_rejected() {
        let text = with_source("script = \"date\"\ninterval = \"1m\"\nscale = 0.5");
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("script_interpreter"));
    }

    #[test]
    fn test_prefetch_without_url_rejected() {
        let text = with_source(
            r#"
            file = "/dev/urandom"
            prefetch = "https://example.com"
            interval = "1m"
            scale = 0.5
            "#,
        );
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("prefetch"));
    }

    #[test]
    fn test_interval_floor_enforced() {
        let text = with_source(
            r#"
            file = "/dev/urandom"
            interval = "5s"
            scale = 0.5
            "#,
        );
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("interval"));
    }

    #[test]
    fn test_scale_bounds_enforced() {
        let text = with_source(
            r#"
            file = "/dev/urandom"
            interval = "1m"
            scale = 1.5
            "#,
        );
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("scale"));
    }

    #[test]
    fn test_min_size_above_size_rejected() {
        let text = with_source(
            r#"
            file = "/dev/urandom"
            interval = "1m"
            scale = 0.5
            size = 100
            min_size = 200
            "#,
        );
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("min_size"));
    }

    #[test]
    fn test_non_env_safe_custom_key_rejected() {
        let text = with_source(
            r#"
            file = "/dev/urandom"
            interval = "1m"
            scale = 0.5
            "bad-key" = "x"
            "#,
        );
        let err = Config::from_str(&text).unwrap_err();
        assert!(err.message.contains("bad-key"));
    }

    #[test]
    fn test_persist_interval_bounds() {
        let too_short = BASE.replace("\"5m\"", "\"2s\"");
        assert!(Config::from_str(&too_short).is_err());
        let too_long = BASE.replace("\"5m\"", "\"25h\"");
        assert!(Config::from_str(&too_long).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let text = BASE.replace("7787", "0");
        assert!(Config::from_str(&text).is_err());
    }

    #[test]
    fn test_env_safe_key_rules() {
        assert!(is_env_safe("crystal"));
        assert!(is_env_safe("my_key_2"));
        assert!(!is_env_safe(""));
        assert!(!is_env_safe("2fast"));
        assert!(!is_env_safe("bad-key"));
        assert!(!is_env_safe("no spaces"));
    }

    #[test]
    fn test_disabled_sources_are_filtered() {
        let text = format!(
            "{BASE}\n\
             [sources.on]\nfile = \"/dev/urandom\"\ninterval = \"1m\"\nscale = 0.5\n\
             [sources.off]\nfile = \"/dev/urandom\"\ninterval = \"1m\"\nscale = 0.5\ndisabled = true\n"
        );
        let config = Config::from_str(&text).unwrap();
        let names: Vec<&str> = config.enabled_sources().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["on"]);
    }

    #[test]
    fn test_config_roundtrips_through_serialization() {
        let text = with_source(
            r#"
            url = "https://example.com/noise"
            interval = "10m"
            scale = 0.25
            init_delay = "30s"
            "#,
        );
        let config = Config::from_str(&text).unwrap();
        let rendered = toml::to_string(&config).unwrap();
        let reparsed = Config::from_str(&rendered).unwrap();
        assert_eq!(reparsed.sources["test"].interval, Duration::from_secs(600));
        assert_eq!(reparsed.sources["test"].init_delay, Some(Duration::from_secs(30)));
    }
}
