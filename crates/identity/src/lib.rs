//! Bethrou node identity
//!
//! Persists the long-lived Ed25519 keypair that gives a node its stable peer
//! ID. The key is generated on first boot, written to disk with owner-only
//! permissions, and loaded unchanged on every boot after that.

use std::path::{Path, PathBuf};

use libp2p::identity::Keypair;
use libp2p::PeerId;
use thiserror::Error;
use tracing::info;

const DEFAULT_KEY_FILE: &str = "node.key";
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("failed to read key file: {0}")]
    Read(std::io::Error),

    #[error("failed to write key file: {0}")]
    Write(std::io::Error),

    #[error("failed to decode private key: {0}")]
    Decode(String),

    #[error("failed to encode private key: {0}")]
    Encode(String),
}

/// Loads and persists the node keypair at a fixed path.
pub struct IdentityManager {
    key_path: PathBuf,
}

impl IdentityManager {
    /// An empty path falls back to `node.key` in the working directory.
    pub fn new(key_path: impl AsRef<Path>) -> Self {
        let path = key_path.as_ref();
        let key_path = if path.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_KEY_FILE)
        } else {
            path.to_path_buf()
        };

        Self { key_path }
    }

    /// Load the keypair from disk, generating and persisting a fresh one if
    /// the file does not exist yet.
    pub fn load_or_generate(&self) -> Result<Keypair, IdentityError> {
        if self.key_path.exists() {
            return self.load();
        }

        self.generate_and_save()
    }

    fn load(&self) -> Result<Keypair, IdentityError> {
        let bytes = std::fs::read(&self.key_path).map_err(IdentityError::Read)?;

        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        info!(path = %self.key_path.display(), "Loaded node identity");
        Ok(keypair)
    }

    fn generate_and_save(&self) -> Result<Keypair, IdentityError> {
        let keypair = generate();

        let bytes = keypair
            .to_protobuf_encoding()
            .map_err(|e| IdentityError::Encode(e.to_string()))?;

        std::fs::write(&self.key_path, &bytes).map_err(IdentityError::Write)?;
        restrict_permissions(&self.key_path)?;

        info!(
            path = %self.key_path.display(),
            peer_id = %PeerId::from(keypair.public()),
            "Generated new node identity",
        );
        Ok(keypair)
    }
}

/// Generate a fresh Ed25519 keypair without persisting it. Client hosts use
/// this for their per-run identity.
pub fn generate() -> Keypair {
    Keypair::generate_ed25519()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), IdentityError> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(KEY_FILE_MODE);
    std::fs::set_permissions(path, perms).map_err(IdentityError::Write)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), IdentityError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_new_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("test_node.key");

        let mgr = IdentityManager::new(&key_path);
        let keypair = mgr.load_or_generate().unwrap();

        assert!(key_path.exists());
        assert_eq!(
            keypair.key_type(),
            libp2p::identity::KeyType::Ed25519
        );
    }

    #[test]
    fn loads_existing_key_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("test_node.key");

        let mgr = IdentityManager::new(&key_path);
        let first = mgr.load_or_generate().unwrap();
        let second = mgr.load_or_generate().unwrap();

        assert_eq!(
            PeerId::from(first.public()),
            PeerId::from(second.public())
        );
        assert_eq!(
            first.to_protobuf_encoding().unwrap(),
            second.to_protobuf_encoding().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("test_node.key");

        IdentityManager::new(&key_path).load_or_generate().unwrap();

        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_key_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("corrupt.key");
        std::fs::write(&key_path, b"not a key").unwrap();

        let result = IdentityManager::new(&key_path).load_or_generate();
        assert!(matches!(result, Err(IdentityError::Decode(_))));
    }

    #[test]
    fn empty_path_defaults_to_node_key() {
        let mgr = IdentityManager::new("");
        assert_eq!(mgr.key_path, PathBuf::from("node.key"));
    }
}
