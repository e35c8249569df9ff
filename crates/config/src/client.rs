//! Client configuration file (`client.yaml`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::shared::{DiscoveryConfig, LogConfig, NodeDescriptor};
use crate::ConfigError;

/// Local SOCKS5 listener settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub auth: bool,
    pub user: String,
    pub pass: String,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::invalid("SOCKS listen address is required"));
        }

        if self.auth && (self.user.is_empty() || self.pass.is_empty()) {
            return Err(ConfigError::invalid(
                "SOCKS auth enabled but user or pass is empty",
            ));
        }

        Ok(())
    }
}

/// Exit-node routing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// `random`, `fastest` or `round-robin`. Empty means random.
    pub strategy: String,
    /// Health-check interval. Empty or zero disables the health loop.
    pub health: String,
    /// Per-probe timeout.
    pub timeout: String,
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.strategy.as_str() {
            "" | "random" | "fastest" | "round-robin" => {}
            other => {
                return Err(ConfigError::invalid(format!(
                    "unsupported routing strategy: {other}"
                )))
            }
        }

        if !self.health.is_empty() {
            parse_duration(&self.health).map_err(|_| {
                ConfigError::invalid(format!("invalid routing.health duration: {}", self.health))
            })?;
        }

        if !self.timeout.is_empty() {
            parse_duration(&self.timeout).map_err(|_| {
                ConfigError::invalid(format!("invalid routing.timeout duration: {}", self.timeout))
            })?;
        }

        Ok(())
    }

    /// Health-check interval, `None` when the loop is disabled.
    pub fn health_interval(&self) -> Option<Duration> {
        if self.health.is_empty() {
            return None;
        }

        match parse_duration(&self.health) {
            Ok(d) if d > Duration::ZERO => Some(d),
            _ => None,
        }
    }

    /// Probe timeout, zero when unset.
    pub fn probe_timeout(&self) -> Duration {
        if self.timeout.is_empty() {
            return Duration::ZERO;
        }

        parse_duration(&self.timeout).unwrap_or(Duration::ZERO)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Path to the network pre-shared key file.
    pub key: String,
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub nodes: Vec<NodeDescriptor>,
    pub discovery: DiscoveryConfig,
    pub log: LogConfig,
}

impl ClientConfig {
    /// Load and parse a YAML config file. Validation is separate so callers
    /// can apply flag overrides in between.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::invalid("network key is required"));
        }

        self.server.validate()?;
        self.routing.validate()?;
        self.discovery.validate()?;
        self.log.validate()?;

        for node in &self.nodes {
            node.validate()?;
        }

        if self.nodes.is_empty() && !self.discovery.enabled {
            return Err(ConfigError::invalid(
                "at least one static node or discovery must be enabled",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> ClientConfig {
        ClientConfig {
            key: "network.key".to_string(),
            server: ServerConfig {
                listen: "127.0.0.1:1080".to_string(),
                ..Default::default()
            },
            nodes: vec![NodeDescriptor {
                id: "12D3KooWExample".to_string(),
                addrs: vec!["/ip4/127.0.0.1/tcp/4001/p2p/12D3KooWExample".to_string()],
                relay: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn requires_key() {
        let mut cfg = valid_config();
        cfg.key.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn requires_listen_address() {
        let mut cfg = valid_config();
        cfg.server.listen.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auth_requires_credentials() {
        let mut cfg = valid_config();
        cfg.server.auth = true;
        assert!(cfg.validate().is_err());

        cfg.server.user = "user".to_string();
        cfg.server.pass = "pass".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn requires_nodes_or_discovery() {
        let mut cfg = valid_config();
        cfg.nodes.clear();
        assert!(cfg.validate().is_err());

        cfg.discovery.enabled = true;
        cfg.discovery.address = "redis://localhost:6379".to_string();
        cfg.discovery.topic = "bethrou".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_strategy() {
        let mut cfg = valid_config();
        cfg.routing.strategy = "quantum".to_string();
        assert!(cfg.validate().is_err());

        for strategy in ["random", "fastest", "round-robin", ""] {
            cfg.routing.strategy = strategy.to_string();
            assert!(cfg.validate().is_ok(), "strategy {strategy:?} should pass");
        }
    }

    #[test]
    fn rejects_bad_durations() {
        let mut cfg = valid_config();
        cfg.routing.health = "often".to_string();
        assert!(cfg.validate().is_err());

        cfg.routing.health = "30s".to_string();
        cfg.routing.timeout = "soon".to_string();
        assert!(cfg.validate().is_err());

        cfg.routing.timeout = "5s".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn health_interval_zero_disables_loop() {
        let routing = RoutingConfig {
            health: "0s".to_string(),
            ..Default::default()
        };
        assert_eq!(routing.health_interval(), None);

        let routing = RoutingConfig {
            health: "30s".to_string(),
            ..Default::default()
        };
        assert_eq!(routing.health_interval(), Some(Duration::from_secs(30)));

        assert_eq!(RoutingConfig::default().health_interval(), None);
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
key: network.key
server:
  listen: 127.0.0.1:11080
routing:
  strategy: fastest
  health: 30s
  timeout: 5s
nodes:
  - id: 12D3KooWExample
    addrs:
      - /ip4/127.0.0.1/tcp/4001/p2p/12D3KooWExample
log:
  level: debug
  format: json
"#
        )
        .unwrap();

        let cfg = ClientConfig::load(file.path()).unwrap();
        assert_eq!(cfg.server.listen, "127.0.0.1:11080");
        assert_eq!(cfg.routing.strategy, "fastest");
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.log.format, "json");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(matches!(
            ClientConfig::load("/definitely/not/here.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
