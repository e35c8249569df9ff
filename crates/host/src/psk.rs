//! Network pre-shared key handling.
//!
//! The overlay is gated by a single PSK file in the swarm-key v1 format.
//! Every member must load a byte-identical copy; a mismatch makes every
//! handshake fail at the transport layer.

use std::path::{Path, PathBuf};

use libp2p::pnet::PreSharedKey;
use tracing::info;

use crate::HostError;

/// Paths probed when no explicit key path is configured, relative to the
/// working directory of the binary.
const SEARCH_PATHS: [&str; 3] = ["network.key", "../network.key", "../../network.key"];

/// Load and decode the PSK file at `path`.
pub fn load(path: &Path) -> Result<PreSharedKey, HostError> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        HostError::Psk(format!(
            "failed to read network key from {}: {e}",
            path.display()
        ))
    })?;

    data.parse::<PreSharedKey>().map_err(|e| {
        HostError::Psk(format!(
            "failed to decode psk from {}: {e}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        ))
    })
}

/// Resolve the network key path: an explicit path wins, otherwise probe the
/// conventional locations next to the binary.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, HostError> {
    if let Some(path) = explicit {
        if !path.as_os_str().is_empty() {
            return Ok(path.to_path_buf());
        }
    }

    info!("network key path not set; looking for network.key next to the binary");

    for candidate in SEARCH_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!(path = candidate, "found network key");
            return Ok(path.to_path_buf());
        }
    }

    Err(HostError::Psk(
        "network key not found; set --key or place network.key next to the binary".to_string(),
    ))
}
