//! Runtime Configuration
//!
//! Handles parsing of `vox-rt.toml` files and `VOX_RT_*` environment overrides.
//! The runtime never goes looking for a file on its own: embedders either call
//! [`install`] with a loaded config or get defaults plus environment overrides
//! from [`current`].

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name searched for by [`RuntimeConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "vox-rt.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching vox-rt.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Event loop tuning
    #[serde(default)]
    pub event_loop: EventLoopConfig,

    /// TCP behaviour
    #[serde(default)]
    pub net: NetConfig,

    /// Process start-up
    #[serde(default)]
    pub process: ProcessConfig,
}

impl RuntimeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `VOX_RT_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var::<u64>(&lookup, "VOX_RT_FALLBACK_POLL_MS") {
            self.event_loop.fallback_poll_ms = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "VOX_RT_TCP_NODELAY") {
            self.net.tcp_nodelay = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "VOX_RT_CONNECT_TIMEOUT_MS") {
            self.net.connect_timeout_ms = if v == 0 { None } else { Some(v) };
        }
        if let Some(v) = parse_bool_var(&lookup, "VOX_RT_STRICT_NET") {
            self.net.strict_errors = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "VOX_RT_STACK_LIMIT") {
            self.process.stack_limit_bytes = v;
        }
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}

fn parse_bool_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let raw = lookup(name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}

/// Event loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLoopConfig {
    /// Longest single sleep of the busy-poll fallback backend
    #[serde(default = "default_fallback_poll_ms")]
    pub fallback_poll_ms: u64,
}

fn default_fallback_poll_ms() -> u64 {
    1
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            fallback_poll_ms: default_fallback_poll_ms(),
        }
    }
}

/// TCP settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Set TCP_NODELAY on connected and accepted streams
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Per-candidate connect timeout; blocking connect when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub listen_backlog: i32,

    /// Panic on connect/recv/send failures at the C ABI instead of returning -1
    #[serde(default)]
    pub strict_errors: bool,
}

fn default_true() -> bool {
    true
}

fn default_backlog() -> i32 {
    128
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            connect_timeout_ms: None,
            listen_backlog: default_backlog(),
            strict_errors: false,
        }
    }
}

/// Process start-up settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Raise the soft stack limit during start-up
    #[serde(default = "default_true")]
    pub raise_stack_limit: bool,

    /// Target soft stack limit in bytes
    #[serde(default = "default_stack_limit")]
    pub stack_limit_bytes: u64,
}

fn default_stack_limit() -> u64 {
    64 * 1024 * 1024
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            raise_stack_limit: true,
            stack_limit_bytes: default_stack_limit(),
        }
    }
}

static CURRENT: OnceCell<RuntimeConfig> = OnceCell::new();

/// Install the process-wide configuration.
///
/// Only the first call wins; later calls get their config handed back.
pub fn install(config: RuntimeConfig) -> Result<(), RuntimeConfig> {
    CURRENT.set(config)
}

/// Process-wide configuration, defaulting to built-ins plus environment overrides.
pub fn current() -> &'static RuntimeConfig {
    CURRENT.get_or_init(|| {
        let mut config = RuntimeConfig::default();
        config.apply_env();
        config
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.event_loop.fallback_poll_ms, 1);
        assert!(config.net.tcp_nodelay);
        assert_eq!(config.net.listen_backlog, 128);
        assert!(!config.net.strict_errors);
        assert_eq!(config.process.stack_limit_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[event_loop]
fallback_poll_ms = 5

[net]
tcp_nodelay = false
connect_timeout_ms = 250
strict_errors = true
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.event_loop.fallback_poll_ms, 5);
        assert!(!config.net.tcp_nodelay);
        assert_eq!(config.net.connect_timeout_ms, Some(250));
        assert!(config.net.strict_errors);
        // Missing fields and sections keep their defaults
        assert_eq!(config.net.listen_backlog, 128);
        assert!(config.process.raise_stack_limit);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VOX_RT_FALLBACK_POLL_MS", "7"),
            ("VOX_RT_TCP_NODELAY", "off"),
            ("VOX_RT_CONNECT_TIMEOUT_MS", "0"),
            ("VOX_RT_STRICT_NET", "yes"),
            ("VOX_RT_STACK_LIMIT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config.net.connect_timeout_ms = Some(10);
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.event_loop.fallback_poll_ms, 7);
        assert!(!config.net.tcp_nodelay);
        assert_eq!(config.net.connect_timeout_ms, None);
        assert!(config.net.strict_errors);
        assert_eq!(config.process.stack_limit_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_save_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = RuntimeConfig::default();
        config.net.listen_backlog = 16;
        config.save(&dir.path().join(CONFIG_FILE_NAME)).unwrap();

        let found = RuntimeConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
