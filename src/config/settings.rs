//! Server settings
//!
//! Read from YAML (default `~/.flowdeploy/config.yaml`). Every field has a
//! default, so an empty file or no file at all gives a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::placement::DEFAULT_MAX_APPS;
use crate::topology::{build_topology, TopologyError, TopologyKind, TopologySpec};

/// Default port of the scheduler's HTTP surface
pub const DEFAULT_PORT: u16 = 8282;

/// Default config file location: ~/.flowdeploy/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flowdeploy")
        .join("config.yaml")
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Components a host may run at once
    pub max_apps: usize,
    /// Service used to backfill idle capacity; `None` disables backfill
    pub filler_service: Option<String>,
    pub control_plane: ControlPlaneSettings,
    pub runtime: RuntimeSettings,
    pub readiness: ReadinessSettings,
    pub topology: TopologySettings,
    /// JSONC service catalog; the built-in catalog when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_apps: DEFAULT_MAX_APPS,
            filler_service: Some("colab".to_string()),
            control_plane: ControlPlaneSettings::default(),
            runtime: RuntimeSettings::default(),
            readiness: ReadinessSettings::default(),
            topology: TopologySettings::default(),
            catalog: None,
            server: ServerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    /// Base URL of the ofctl_rest API
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 2000,
        }
    }
}

impl ControlPlaneSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Wrapper placed before every component command; `{host}` is substituted
    pub host_exec: Vec<String>,
    pub scripts_dir: PathBuf,
    /// Component log files go here
    pub work_dir: PathBuf,
    pub stop_grace_secs: u64,
    pub startup_check_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            host_exec: ["ip", "netns", "exec", "{host}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scripts_dir: PathBuf::from("./scripts"),
            work_dir: std::env::temp_dir().join("flowdeploy"),
            stop_grace_secs: 5,
            startup_check_ms: 300,
        }
    }
}

impl RuntimeSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn startup_check(&self) -> Duration {
        Duration::from_millis(self.startup_check_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Directory reporters write `{service_key}.txt` into
    pub shared_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("/shared"),
            poll_interval_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl ReadinessSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which network the scheduler runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    pub kind: TopologyKind,
    /// JSON topology description; overrides `kind`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            kind: TopologyKind::Simple,
            file: None,
        }
    }
}

impl TopologySettings {
    pub fn load(&self) -> Result<TopologySpec, TopologyError> {
        match &self.file {
            Some(path) => TopologySpec::load(&expand_path(path)),
            None => Ok(build_topology(self.kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

impl Settings {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Copy with every configured path expanded
    pub fn expanded(mut self) -> Self {
        self.runtime.scripts_dir = expand_path(&self.runtime.scripts_dir);
        self.runtime.work_dir = expand_path(&self.runtime.work_dir);
        self.readiness.shared_dir = expand_path(&self.readiness.shared_dir);
        self.catalog = self.catalog.as_deref().map(expand_path);
        self.topology.file = self.topology.file.as_deref().map(expand_path);
        self
    }
}
