//! Configuration types shared between the client and the node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::ConfigError;

/// Default window for collecting discovery responses.
pub(crate) const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A network node with its addresses and optional relay.
///
/// The `addrs` list is tried in order at connect time. When `relay` is set it
/// takes precedence: the client connects to the relay first and reaches the
/// node through a circuit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

impl NodeDescriptor {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::invalid("node ID is required"));
        }

        if self.addrs.is_empty() && self.relay.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::invalid(
                "at least one address or relay is required",
            ));
        }

        Ok(())
    }
}

/// Settings for the out-of-band discovery service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub address: String,
    pub topic: String,
    pub timeout: String,
    pub user: String,
    pub pass: String,
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.address.is_empty() {
            return Err(ConfigError::invalid(
                "discovery address is required when discovery is enabled",
            ));
        }

        if self.topic.is_empty() {
            return Err(ConfigError::invalid(
                "discovery topic is required when discovery is enabled",
            ));
        }

        if !self.timeout.is_empty() {
            parse_duration(&self.timeout)?;
        }

        Ok(())
    }

    /// Response collection window, falling back to the 10 s default.
    pub fn timeout_duration(&self) -> Duration {
        if self.timeout.is_empty() {
            return DEFAULT_DISCOVERY_TIMEOUT;
        }

        parse_duration(&self.timeout).unwrap_or(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

/// Logging settings. Empty fields fall back to `info` / `text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "" | "text" | "json" => Ok(()),
            other => Err(ConfigError::invalid(format!(
                "invalid log format: {other}"
            ))),
        }
    }

    pub fn level_or_default(&self) -> &str {
        if self.level.is_empty() {
            "info"
        } else {
            &self.level
        }
    }

    pub fn format_or_default(&self) -> &str {
        if self.format.is_empty() {
            "text"
        } else {
            &self.format
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_descriptor_requires_id() {
        let node = NodeDescriptor {
            id: String::new(),
            addrs: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
            relay: None,
        };
        assert!(node.validate().is_err());
    }

    #[test]
    fn node_descriptor_requires_addr_or_relay() {
        let node = NodeDescriptor {
            id: "12D3KooWExample".to_string(),
            addrs: vec![],
            relay: None,
        };
        assert!(node.validate().is_err());

        let with_relay = NodeDescriptor {
            relay: Some("/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWRelay".to_string()),
            ..node.clone()
        };
        assert!(with_relay.validate().is_ok());

        let with_addr = NodeDescriptor {
            addrs: vec!["/ip4/127.0.0.1/tcp/4001/p2p/12D3KooWExample".to_string()],
            ..node
        };
        assert!(with_addr.validate().is_ok());
    }

    #[test]
    fn node_descriptor_json_round_trip() {
        let node = NodeDescriptor {
            id: "12D3KooWExample".to_string(),
            addrs: vec![
                "/ip4/127.0.0.1/tcp/4001/p2p/12D3KooWExample".to_string(),
                "/ip4/10.0.0.5/tcp/4001/p2p/12D3KooWExample".to_string(),
            ],
            relay: None,
        };

        let encoded = serde_json::to_string(&node).unwrap();
        let decoded: NodeDescriptor = serde_json::from_str(&encoded).unwrap();
        assert_eq!(node, decoded);

        // The relay field is omitted entirely when unset.
        assert!(!encoded.contains("relay"));
    }

    #[test]
    fn node_descriptor_json_round_trip_with_relay() {
        let node = NodeDescriptor {
            id: "12D3KooWExample".to_string(),
            addrs: vec![],
            relay: Some("/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWRelay".to_string()),
        };

        let encoded = serde_json::to_string(&node).unwrap();
        let decoded: NodeDescriptor = serde_json::from_str(&encoded).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn discovery_disabled_skips_validation() {
        let cfg = DiscoveryConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn discovery_enabled_requires_address_and_topic() {
        let cfg = DiscoveryConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DiscoveryConfig {
            enabled: true,
            address: "redis://localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DiscoveryConfig {
            enabled: true,
            address: "redis://localhost:6379".to_string(),
            topic: "bethrou".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn discovery_timeout_defaults_to_ten_seconds() {
        let cfg = DiscoveryConfig::default();
        assert_eq!(cfg.timeout_duration(), Duration::from_secs(10));

        let cfg = DiscoveryConfig {
            timeout: "2s".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.timeout_duration(), Duration::from_secs(2));
    }

    #[test]
    fn log_config_formats() {
        assert!(LogConfig::default().validate().is_ok());
        assert!(LogConfig {
            format: "json".to_string(),
            ..Default::default()
        }
        .validate()
        .is_ok());
        assert!(LogConfig {
            format: "xml".to_string(),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn log_config_defaults() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level_or_default(), "info");
        assert_eq!(cfg.format_or_default(), "text");
    }
}
