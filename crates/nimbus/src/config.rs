//! Configuration management for a Nimbus node.
//!
//! This module handles loading, validation, and conversion of node
//! configuration from TOML files and command-line arguments.

use nimbus_wrapper::{LaunchSettings, ServiceDescriptor, ServiceState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render default configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("configuration validation failed: {0}")]
    Invalid(String),
}

/// Which part of the cluster this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manager,
    Wrapper,
    Proxy,
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "manager" => Ok(NodeRole::Manager),
            "wrapper" => Ok(NodeRole::Wrapper),
            "proxy" => Ok(NodeRole::Proxy),
            other => Err(format!("unknown node role: {other}")),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            NodeRole::Manager => "manager",
            NodeRole::Wrapper => "wrapper",
            NodeRole::Proxy => "proxy",
        };
        f.write_str(role)
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub node: NodeSettings,
    pub network: NetworkSettings,
    #[serde(default)]
    pub wrapper: WrapperSettings,
    #[serde(default)]
    pub manager: ManagerSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub role: NodeRole,
    /// Name this node reports itself under (proxy name, wrapper name).
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Address the manager listens on.
    pub bind_address: String,
    /// Address wrappers and proxies connect to.
    pub manager_address: String,
    /// Deadline for outbound requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Wrapper node settings.
///
/// `launch_args` may use the `{name}`, `{group}`, `{port}` and `{memory}`
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperSettings {
    pub max_simultaneously_starting_services: usize,
    pub poll_interval_ms: u64,
    pub services_directory: String,
    pub launch_program: String,
    pub launch_args: Vec<String>,
    pub ready_marker: Option<String>,
    /// State a service enters once ready: VISIBLE or INVISIBLE.
    pub initial_state: ServiceState,
}

impl Default for WrapperSettings {
    fn default() -> Self {
        Self {
            max_simultaneously_starting_services: 2,
            poll_interval_ms: 200,
            services_directory: "services".to_string(),
            launch_program: "java".to_string(),
            launch_args: vec![
                "-Xmx{memory}M".to_string(),
                "-jar".to_string(),
                "server.jar".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
            ],
            ready_marker: Some("Done (".to_string()),
            initial_state: ServiceState::Visible,
        }
    }
}

impl WrapperSettings {
    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            program: self.launch_program.clone(),
            args: self.launch_args.clone(),
            services_directory: PathBuf::from(&self.services_directory),
            ready_marker: self.ready_marker.clone(),
            running_state: self.initial_state,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Directory holding offline player records.
    pub player_directory: String,
    /// Command names proxies forward to the cluster.
    #[serde(default)]
    pub ingame_commands: Vec<String>,
    /// How often unplaced services are offered to wrappers again.
    #[serde(default = "default_deploy_interval_ms")]
    pub deploy_interval_ms: u64,
    /// Services placed on wrappers once they connect.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

fn default_deploy_interval_ms() -> u64 {
    1_000
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            player_directory: "players".to_string(),
            ingame_commands: Vec::new(),
            deploy_interval_ms: default_deploy_interval_ms(),
            services: Vec::new(),
        }
    }
}

impl ManagerSettings {
    pub fn deploy_interval(&self) -> Duration {
        Duration::from_millis(self.deploy_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy group used for hidden-service filtering.
    pub group: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            group: "Proxy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                role: NodeRole::Manager,
                name: "manager-1".to_string(),
            },
            network: NetworkSettings {
                bind_address: "127.0.0.1:1630".to_string(),
                manager_address: "127.0.0.1:1630".to_string(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            wrapper: WrapperSettings::default(),
            manager: ManagerSettings::default(),
            proxy: ProxySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.network.request_timeout_ms)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.node.name.trim().is_empty() {
            return Err("Node name cannot be empty".to_string());
        }

        if self.network.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.network.bind_address));
        }
        if self
            .network
            .manager_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .is_none()
        {
            return Err(format!(
                "Invalid manager address: {}",
                &self.network.manager_address
            ));
        }
        if self.network.request_timeout_ms == 0 {
            return Err("Request timeout must be greater than zero".to_string());
        }

        if self.wrapper.max_simultaneously_starting_services == 0 {
            return Err("max_simultaneously_starting_services must be at least 1".to_string());
        }
        if self.wrapper.poll_interval_ms == 0 {
            return Err("Scheduler poll interval must be greater than zero".to_string());
        }
        if !self.wrapper.initial_state.is_running() {
            return Err(format!(
                "Initial service state must be VISIBLE or INVISIBLE, got {}",
                self.wrapper.initial_state
            ));
        }
        if self.node.role == NodeRole::Wrapper && self.wrapper.launch_program.is_empty() {
            return Err("Launch program cannot be empty".to_string());
        }

        if self.manager.deploy_interval_ms == 0 {
            return Err("Deploy interval must be greater than zero".to_string());
        }
        let mut names = HashSet::new();
        for service in &self.manager.services {
            if service.name.trim().is_empty() {
                return Err("Service name cannot be empty".to_string());
            }
            if !names.insert(service.name.as_str()) {
                return Err(format!("Service {} is listed twice", service.name));
            }
            if service.port == 0 {
                return Err(format!("Service {} needs a port", service.name));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.node.role, NodeRole::Manager);
        assert_eq!(config.network.bind_address, "127.0.0.1:1630");
        assert_eq!(config.network.request_timeout_ms, 10_000);
        assert_eq!(config.wrapper.max_simultaneously_starting_services, 2);
        assert_eq!(config.wrapper.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.wrapper.initial_state, ServiceState::Visible);
        assert_eq!(config.manager.player_directory, "players");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nimbus.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.node.name, "manager-1");
        assert!(path.exists());

        // The written file loads back to the same values.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.wrapper.launch_args, config.wrapper.launch_args);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[node]
role = "wrapper"
name = "wrapper-eu-1"

[network]
bind_address = "0.0.0.0:1630"
manager_address = "manager.internal:1630"

[wrapper]
max_simultaneously_starting_services = 4
poll_interval_ms = 100
services_directory = "/srv/nimbus/services"
launch_program = "sh"
launch_args = ["start.sh", "{name}"]
initial_state = "INVISIBLE"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.node.role, NodeRole::Wrapper);
        assert_eq!(config.network.request_timeout_ms, 10_000);
        assert_eq!(config.wrapper.max_simultaneously_starting_services, 4);
        assert_eq!(config.wrapper.ready_marker, None);
        assert_eq!(config.wrapper.initial_state, ServiceState::Invisible);
        assert_eq!(config.proxy.group, "Proxy");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());

        let launch = config.wrapper.launch_settings();
        assert_eq!(launch.services_directory, PathBuf::from("/srv/nimbus/services"));
        assert_eq!(launch.running_state, ServiceState::Invisible);
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_parse_error() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[node\nrole = ").await.unwrap();
        assert!(matches!(
            AppConfig::load_from_file(temp_file.path()).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.wrapper.max_simultaneously_starting_services = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.wrapper.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.network.bind_address = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.wrapper.initial_state = ServiceState::Starting;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_manager_services_and_commands() {
        let toml_content = r#"
[node]
role = "manager"
name = "manager-1"

[network]
bind_address = "0.0.0.0:1630"
manager_address = "127.0.0.1:1630"

[manager]
player_directory = "players"
ingame_commands = ["hub", "party"]

[[manager.services]]
name = "lobby-1"
group = "lobby"
port = 30001

[[manager.services]]
name = "staff-1"
group = "staff"
port = 30002
max_memory_mb = 1024
hidden_at_proxy_groups = ["public"]

[logging]
level = "info"
json_format = false
"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();
        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.manager.ingame_commands, vec!["hub", "party"]);
        assert_eq!(config.manager.deploy_interval(), Duration::from_secs(1));
        assert_eq!(config.manager.services.len(), 2);
        assert_eq!(config.manager.services[0].host, "127.0.0.1");
        assert_eq!(config.manager.services[0].max_memory_mb, 512);
        assert!(config.manager.services[1].is_hidden_at("public"));
        assert!(config.validate().is_ok());

        let mut duplicated = config.clone();
        duplicated.manager.services[1].name = "lobby-1".to_string();
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Proxy".parse::<NodeRole>(), Ok(NodeRole::Proxy));
        assert!("router".parse::<NodeRole>().is_err());
        assert_eq!(NodeRole::Wrapper.to_string(), "wrapper");
    }
}
