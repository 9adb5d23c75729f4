//! Configuration
//!
//! `SessionConfig` identifies one remote endpoint and never changes after a
//! session is created. `DeskpilotConfig` is the process-wide YAML file
//! (`~/.deskpilot/config.yaml` by default) carrying pacing, polling and
//! screenshot defaults plus named session presets.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5901;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_SESSION_NAME_LEN: usize = 64;

/// Session names are registry keys and screenshot file prefixes: ASCII
/// letters, digits, `_`, `-` and `.`, not starting with `.`.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("session name must not be empty"));
    }
    if name.len() > MAX_SESSION_NAME_LEN {
        return Err(Error::invalid(format!(
            "session name longer than {} characters",
            MAX_SESSION_NAME_LEN
        )));
    }
    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::invalid(format!("invalid session name: {:?}", name)));
    }
    Ok(())
}

// ========== SessionConfig ==========

/// Connection parameters for one remote display server.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: String::new(),
            username: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port`, used in logs and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("username", &self.username)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

// ========== File config ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub max_width: u32,
    pub quality: u8,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            quality: 85,
        }
    }
}

/// Inter-event delays, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub key_delay_ms: u64,
    pub char_delay_ms: u64,
    pub pointer_delay_ms: u64,
    pub double_click_gap_ms: u64,
    pub navigate_settle_ms: u64,
    pub confirm_settle_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            key_delay_ms: 50,
            char_delay_ms: 50,
            pointer_delay_ms: 50,
            double_click_gap_ms: 100,
            navigate_settle_ms: 300,
            confirm_settle_ms: 500,
        }
    }
}

/// Capture budget used by polling loops and frame streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub capture_timeout_secs: u64,
    pub retry_budget: u32,
    pub backoff_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            capture_timeout_secs: 10,
            retry_budget: 3,
            backoff_secs: 5,
            poll_interval_secs: 2,
        }
    }
}

/// A named endpoint that can be connected by name, optionally at startup.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPreset {
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub autoconnect: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl SessionPreset {
    pub fn to_session_config(&self, connect_timeout: Duration) -> SessionConfig {
        let mut config = SessionConfig::new(&self.host, self.port)
            .with_password(&self.password)
            .with_connect_timeout(connect_timeout);
        config.username = self.username.clone();
        config
    }
}

impl fmt::Debug for SessionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPreset")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("autoconnect", &self.autoconnect)
            .finish_non_exhaustive()
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskpilotConfig {
    /// Size of the blocking worker pool shared by all sessions.
    pub worker_threads: usize,
    pub connect_timeout_secs: u64,
    /// Socket read/write timeout for a connected session.
    pub io_timeout_secs: u64,
    pub screenshot: ScreenshotConfig,
    pub pacing: PacingConfig,
    pub polling: PollingConfig,
    pub sessions: Vec<SessionPreset>,
}

impl Default for DeskpilotConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            io_timeout_secs: 10,
            screenshot: ScreenshotConfig::default(),
            pacing: PacingConfig::default(),
            polling: PollingConfig::default(),
            sessions: Vec::new(),
        }
    }
}

impl DeskpilotConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config("read", format!("{}: {}", path.display(), e)))?;
        let config = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            presets = config.sessions.len(),
            "Config loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::config("parse", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DESKPILOT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(n) = lookup("DESKPILOT_WORKER_THREADS").and_then(|v| v.parse().ok()) {
            self.worker_threads = n;
        }
        if let Some(secs) = lookup("DESKPILOT_CAPTURE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.polling.capture_timeout_secs = secs;
        }
        if let Some(secs) = lookup("DESKPILOT_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::config("validate", "worker_threads must be at least 1"));
        }
        if self.screenshot.max_width == 0 {
            return Err(Error::config("validate", "screenshot.max_width must be at least 1"));
        }
        if self.screenshot.quality > 100 {
            return Err(Error::config(
                "validate",
                format!("screenshot.quality must be 0-100, got {}", self.screenshot.quality),
            ));
        }
        let mut names = HashSet::new();
        for preset in &self.sessions {
            if let Err(e) = validate_session_name(&preset.name) {
                return Err(Error::config("validate", format!("session preset: {}", e)));
            }
            if !names.insert(preset.name.as_str()) {
                return Err(Error::config(
                    "validate",
                    format!("duplicate session preset: {}", preset.name),
                ));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn preset(&self, name: &str) -> Option<&SessionPreset> {
        self.sessions.iter().find(|p| p.name == name)
    }
}

// ========== Paths ==========

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// `$DESKPILOT_HOME`, else `~/.deskpilot`.
pub fn deskpilot_home() -> PathBuf {
    env_path("DESKPILOT_HOME").unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deskpilot")
    })
}

/// `$DESKPILOT_CONFIG`, else `<home>/config.yaml`.
pub fn default_config_path() -> PathBuf {
    env_path("DESKPILOT_CONFIG").unwrap_or_else(|| deskpilot_home().join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DeskpilotConfig::default();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.screenshot.max_width, 800);
        assert_eq!(config.screenshot.quality, 85);
        assert_eq!(config.pacing.key_delay_ms, 50);
        assert_eq!(config.polling.capture_timeout_secs, 10);
        assert_eq!(config.polling.retry_budget, 3);
        assert_eq!(config.polling.backoff_secs, 5);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeskpilotConfig::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, DeskpilotConfig::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
worker_threads: 4
screenshot:
  quality: 60
sessions:
  - name: lab
    host: 10.0.0.5
    password: secret
    autoconnect: true
  - name: spare
"#,
        )
        .unwrap();

        let config = DeskpilotConfig::load(&path).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.screenshot.quality, 60);
        assert_eq!(config.screenshot.max_width, 800);
        assert_eq!(config.sessions.len(), 2);

        let lab = config.preset("lab").unwrap();
        assert_eq!(lab.port, DEFAULT_PORT);
        assert!(lab.autoconnect);
        let session = lab.to_session_config(Duration::from_secs(5));
        assert_eq!(session.endpoint(), "10.0.0.5:5901");
        assert_eq!(session.password, "secret");

        let spare = config.preset("spare").unwrap();
        assert_eq!(spare.host, DEFAULT_HOST);
        assert!(!spare.autoconnect);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = DeskpilotConfig::from_yaml_str("screenshot:\n  quality: 101\n").unwrap_err();
        assert_eq!(err.code(), "config_error");

        let err = DeskpilotConfig::from_yaml_str("worker_threads: 0\n").unwrap_err();
        assert!(err.to_string().contains("worker_threads"));

        let err = DeskpilotConfig::from_yaml_str(
            "sessions:\n  - name: a\n  - name: a\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_session_names() {
        for ok in ["lab", "bios-lab", "vm_01", "host.example"] {
            assert!(validate_session_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "  ", "../escaped", "a/b", "a\\b", "..", ".hidden", "lab 2"] {
            let err = validate_session_name(bad).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "{}", bad);
        }
        assert!(validate_session_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DESKPILOT_WORKER_THREADS", "3"),
            ("DESKPILOT_CAPTURE_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = DeskpilotConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.polling.capture_timeout_secs, 10);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SessionConfig::new("h", 1).with_password("hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
