//! Configuration file support for the device plugin
//!
//! Loads and validates the configuration from a TOML file.
//! Default location: /etc/excat/deviceplugin.toml
//!
//! Every field has a default, so an absent file or a partial file is valid.

use crate::error::{PluginError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/excat/deviceplugin.toml";

/// resctrl access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResctrlConfig {
    /// resctrl mount point
    #[serde(default = "default_resctrl_root")]
    pub root: PathBuf,

    /// Delay before reading a tasks file after a change event, in milliseconds
    #[serde(default = "default_task_settle_delay")]
    pub task_settle_delay_ms: u64,

    /// Upper bound for reading a tasks file, in milliseconds
    #[serde(default = "default_task_read_timeout")]
    pub task_read_timeout_ms: u64,
}

/// Kubelet connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeletConfig {
    /// Directory holding the kubelet and device plugin sockets
    #[serde(default = "default_device_plugin_path")]
    pub device_plugin_path: PathBuf,

    /// Kubelet registration socket name
    #[serde(default = "default_kubelet_socket")]
    pub kubelet_socket: String,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
}

/// Extended resource naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Vendor prefix, including the trailing slash
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Base name, the cache level is appended as `-l<n>`
    #[serde(default = "default_base_name")]
    pub base_name: String,
}

/// Node label patching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Patch node labels with the buffer sizes
    #[serde(default = "default_labels_enabled")]
    pub enabled: bool,

    /// Node to patch, `NODE_NAME` from the environment when unset
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Complete device plugin configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub resctrl: ResctrlConfig,

    #[serde(default)]
    pub kubelet: KubeletConfig,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub labels: LabelConfig,
}

// Default functions
fn default_resctrl_root() -> PathBuf {
    PathBuf::from(excat_resctrl::RESCTRL_ROOT)
}

fn default_task_settle_delay() -> u64 {
    1000
}

fn default_task_read_timeout() -> u64 {
    2000
}

fn default_device_plugin_path() -> PathBuf {
    PathBuf::from(crate::api::DEVICE_PLUGIN_PATH)
}

fn default_kubelet_socket() -> String {
    crate::api::KUBELET_SOCKET.to_string()
}

fn default_dial_timeout() -> u64 {
    5
}

fn default_prefix() -> String {
    crate::consts::RESOURCE_PREFIX.to_string()
}

fn default_base_name() -> String {
    crate::consts::RESOURCE_BASE_NAME.to_string()
}

fn default_labels_enabled() -> bool {
    true
}

impl Default for ResctrlConfig {
    fn default() -> Self {
        Self {
            root: default_resctrl_root(),
            task_settle_delay_ms: default_task_settle_delay(),
            task_read_timeout_ms: default_task_read_timeout(),
        }
    }
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self {
            device_plugin_path: default_device_plugin_path(),
            kubelet_socket: default_kubelet_socket(),
            dial_timeout_secs: default_dial_timeout(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            base_name: default_base_name(),
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            enabled: default_labels_enabled(),
            node_name: None,
        }
    }
}

impl PluginConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                PluginError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(PluginError::Io(e)),
        }
    }

    /// Kubelet registration socket path
    pub fn kubelet_socket_path(&self) -> PathBuf {
        self.kubelet
            .device_plugin_path
            .join(&self.kubelet.kubelet_socket)
    }

    /// Connection establishment timeout as Duration
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.kubelet.dial_timeout_secs)
    }

    /// Tasks file settle delay as Duration
    pub fn task_settle_delay(&self) -> Duration {
        Duration::from_millis(self.resctrl.task_settle_delay_ms)
    }

    /// Tasks file read timeout as Duration
    pub fn task_read_timeout(&self) -> Duration {
        Duration::from_millis(self.resctrl.task_read_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kubelet.dial_timeout_secs == 0 {
            return Err(PluginError::Config(
                "dial_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.kubelet.kubelet_socket.is_empty() {
            return Err(PluginError::Config(
                "kubelet_socket must not be empty".to_string(),
            ));
        }

        if self.resource.base_name.is_empty() {
            return Err(PluginError::Config(
                "resource base_name must not be empty".to_string(),
            ));
        }

        if !self.resource.prefix.is_empty() && !self.resource.prefix.ends_with('/') {
            return Err(PluginError::Config(format!(
                "resource prefix '{}' must end with '/'",
                self.resource.prefix
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PluginConfig::default();
        assert_eq!(config.resctrl.root, PathBuf::from("/sys/fs/resctrl"));
        assert_eq!(
            config.kubelet_socket_path(),
            PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock")
        );
        assert_eq!(config.resource.prefix, "intel.com/");
        assert_eq!(config.resource.base_name, "excat");
        assert!(config.labels.enabled);
        assert!(config.labels.node_name.is_none());
    }

    #[test]
    fn test_durations() {
        let config = PluginConfig::default();
        assert_eq!(config.dial_timeout(), Duration::from_secs(5));
        assert_eq!(config.task_settle_delay(), Duration::from_secs(1));
        assert_eq!(config.task_read_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate() {
        assert!(PluginConfig::default().validate().is_ok());

        let mut config = PluginConfig::default();
        config.kubelet.dial_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PluginConfig::default();
        config.resource.prefix = "intel.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[resctrl]
root = "/tmp/resctrl"

[labels]
enabled = false
node_name = "worker-1"
"#;
        let config: PluginConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resctrl.root, PathBuf::from("/tmp/resctrl"));
        assert!(!config.labels.enabled);
        assert_eq!(config.labels.node_name.as_deref(), Some("worker-1"));
        // Unspecified values should use defaults
        assert_eq!(config.resctrl.task_settle_delay_ms, 1000);
        assert_eq!(config.kubelet.dial_timeout_secs, 5);
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[kubelet]\ndial_timeout_secs = 9").unwrap();
        file.flush().unwrap();

        let config = PluginConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.dial_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[kubelet\n").unwrap();
        file.flush().unwrap();

        assert!(PluginConfig::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = PluginConfig::load_or_default("/nonexistent/path.toml").unwrap();
        assert_eq!(config.resource.base_name, "excat");
    }
}
