//! Configuration types for termpoll.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Dimensions, Error, Markers, ShellConfig};

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Terminal settings
    pub terminal: TerminalSettings,
    /// Shutdown settings
    pub shutdown: ShutdownSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be > 0".to_string()));
        }

        let dims = Dimensions::new(self.terminal.rows, self.terminal.cols);
        if !dims.is_supported() {
            return Err(Error::Config(format!(
                "terminal geometry must be {}x{}, got {}x{}",
                Dimensions::FIXED.rows,
                Dimensions::FIXED.cols,
                dims.rows,
                dims.cols
            )));
        }

        if self.terminal.shell.trim().is_empty() {
            return Err(Error::Config("terminal.shell cannot be empty".to_string()));
        }

        if self.shutdown.poll_interval_ms == 0 {
            return Err(Error::Config(
                "shutdown.poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// How long a reaped session stays queryable, in seconds
    pub retention_secs: u64,
    /// Interval between retention sweeps, in milliseconds
    pub reap_interval_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl ServerSettings {
    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Sweep interval as a duration.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            retention_secs: 300,
            reap_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

/// Terminal settings used to build each session's [`ShellConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Shell executable
    pub shell: String,
    /// Shell arguments
    pub shell_args: Vec<String>,
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// TERM environment variable value
    pub term: String,
    /// PS1 prompt
    pub prompt: String,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Host variables copied into the shell environment when set
    pub inherit_env: Vec<String>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            shell_args: vec![
                "--norc".to_string(),
                "--noprofile".to_string(),
                "-i".to_string(),
            ],
            rows: 24,
            cols: 80,
            term: "xterm-256color".to_string(),
            prompt: "cmd> ".to_string(),
            env: BTreeMap::new(),
            inherit_env: ["PATH", "HOME", "USER", "LOGNAME"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TerminalSettings {
    /// Build the shell configuration, wiring in the marker hook.
    pub fn shell_config(&self, markers: &Markers) -> ShellConfig {
        let mut config = ShellConfig::new(self.shell.clone());
        config.args = self.shell_args.clone();
        config.dimensions = Dimensions::new(self.rows, self.cols);

        for name in &self.inherit_env {
            if let Ok(value) = std::env::var(name) {
                config.env.insert(name.clone(), value);
            }
        }

        config.env.insert("TERM".to_string(), self.term.clone());
        config.env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
        config.env.insert("SHELL".to_string(), self.shell.clone());
        config.env.insert("PS1".to_string(), self.prompt.clone());
        config.env.extend(self.env.clone());
        // The hook always wins over user-supplied variables.
        config
            .env
            .insert("PROMPT_COMMAND".to_string(), markers.prompt_command());

        config
    }
}

/// Shutdown sequencing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long to poll for exit after closing the master, in milliseconds
    pub hangup_wait_ms: u64,
    /// Interval between non-blocking status checks, in milliseconds
    pub poll_interval_ms: u64,
    /// How long to wait after SIGTERM before SIGKILL, in milliseconds
    pub terminate_wait_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            hangup_wait_ms: 300,
            poll_interval_ms: 20,
            terminate_wait_ms: 500,
        }
    }
}
