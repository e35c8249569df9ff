//! Bethrou configuration
//!
//! Shared configuration model for the client and node binaries: node
//! descriptors, discovery and logging settings, and the client YAML file.

mod client;
mod duration;
mod shared;

pub use client::{ClientConfig, RoutingConfig, ServerConfig};
pub use duration::parse_duration;
pub use shared::{DiscoveryConfig, LogConfig, NodeDescriptor};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}
