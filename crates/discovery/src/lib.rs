//! Bethrou discovery
//!
//! Out-of-band coordination over Redis-style pub/sub. Clients publish a
//! discover request on a shared topic and collect replies on a transient
//! channel; nodes subscribe to the topic and answer with their reachable
//! addresses. Discovery is deliberately external to the p2p layer so that
//! bootstrapping works without any prior peer addresses.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bethrou_config::NodeDescriptor;
use bethrou_host::Host;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The only request action nodes answer. Absent actions are accepted for
/// backward compatibility.
pub const ACTION_DISCOVER: &str = "discover";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("discovery address is required")]
    AddressRequired,

    #[error("host is required for server mode")]
    HostRequired,

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: String,
        source: redis::RedisError,
    },

    #[error("failed to publish to {channel}: {source}")]
    Publish {
        channel: String,
        source: redis::RedisError,
    },

    #[error("{0}")]
    InvalidResponse(String),
}

/// A discovery request published on the shared topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply: String,
}

/// A node's answer on the reply channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub addrs: Vec<String>,
}

/// Discovery service settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub address: String,
    pub topic: String,
    pub timeout: Duration,
    pub user: String,
    pub pass: String,
}

impl From<&bethrou_config::DiscoveryConfig> for Config {
    fn from(cfg: &bethrou_config::DiscoveryConfig) -> Self {
        Self {
            address: cfg.address.clone(),
            topic: cfg.topic.clone(),
            timeout: cfg.timeout_duration(),
            user: cfg.user.clone(),
            pass: cfg.pass.clone(),
        }
    }
}

/// Discovery over a Redis broker. With a host attached the service can
/// respond to requests (server mode); without one it can only enumerate
/// (client mode).
pub struct Service {
    config: Config,
    host: Option<Host>,
    client: redis::Client,
}

impl Service {
    pub fn new(config: Config, host: Option<Host>) -> Result<Self, DiscoveryError> {
        if config.address.is_empty() {
            return Err(DiscoveryError::AddressRequired);
        }

        let info = connection_info(&config)?;
        let client = redis::Client::open(info)?;

        Ok(Self {
            config,
            host,
            client,
        })
    }

    /// Enumerate reachable exit nodes: subscribe to a fresh reply channel,
    /// publish a discover request, and collect answers until the timeout or
    /// cancellation. Responses are deduplicated by node ID, first wins.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeDescriptor>, DiscoveryError> {
        let reply_channel = reply_channel_name();

        let mut pubsub = self.client.get_async_pubsub().await?;
        // subscribe completes only once the broker confirms, so no response
        // published after this point can be missed.
        pubsub
            .subscribe(&reply_channel)
            .await
            .map_err(|source| DiscoveryError::Subscribe {
                channel: reply_channel.clone(),
                source,
            })?;

        self.publish_discover(&reply_channel).await?;

        let timeout = if self.config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.config.timeout
        };

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut discovered = Vec::new();
        let mut seen = HashSet::new();
        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut deadline => break,
                msg = messages.next() => {
                    let Some(msg) = msg else { break };
                    let payload: String = msg.get_payload()?;
                    let node = parse_response(&payload)?;
                    if seen.insert(node.id.clone()) {
                        discovered.push(node);
                    }
                }
            }
        }

        Ok(discovered)
    }

    /// Respond to discover requests until cancelled. Requires a host.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let host = self.host.as_ref().ok_or(DiscoveryError::HostRequired)?;

        let topic = if self.config.topic.is_empty() {
            host.peer_id().to_string()
        } else {
            self.config.topic.clone()
        };

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub
            .subscribe(&topic)
            .await
            .map_err(|source| DiscoveryError::Subscribe {
                channel: topic.clone(),
                source,
            })?;

        info!(topic = %topic, "Subscribed to discovery topic");

        let mut publish_conn = self.client.get_multiplexed_async_connection().await?;
        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = messages.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "discovery: undecodable payload");
                            continue;
                        }
                    };

                    debug!(payload = %payload, "Received discovery message");

                    if let Some(reply) = reply_channel_for(&payload) {
                        if let Err(e) = self.publish_node_info(host, &mut publish_conn, &reply).await {
                            error!(error = %e, "error processing discovery message");
                        }
                    }
                }
            }
        }
    }

    async fn publish_discover(&self, reply_channel: &str) -> Result<(), DiscoveryError> {
        let req = DiscoveryRequest {
            action: ACTION_DISCOVER.to_string(),
            reply: reply_channel.to_string(),
        };
        let payload =
            serde_json::to_string(&req).map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = conn
            .publish(&self.config.topic, payload)
            .await
            .map_err(|source| DiscoveryError::Publish {
                channel: self.config.topic.clone(),
                source,
            })?;

        Ok(())
    }

    /// Publish this node's ID and its advertised addresses, each with the
    /// `/p2p/<id>` suffix appended, to a reply channel.
    async fn publish_node_info(
        &self,
        host: &Host,
        conn: &mut MultiplexedConnection,
        reply: &str,
    ) -> Result<(), DiscoveryError> {
        let peer_id = host.peer_id();
        let addrs: Vec<String> = host
            .addrs()
            .await
            .into_iter()
            .map(|a| format!("{a}/p2p/{peer_id}"))
            .collect();

        let resp = DiscoveryResponse {
            id: peer_id.to_string(),
            addrs,
        };
        let payload = serde_json::to_string(&resp)
            .map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))?;

        let _: i64 = conn
            .publish(reply, payload)
            .await
            .map_err(|source| DiscoveryError::Publish {
                channel: reply.to_string(),
                source,
            })?;

        info!(reply = %reply, "discovery: published node info");

        Ok(())
    }
}

fn connection_info(cfg: &Config) -> Result<redis::ConnectionInfo, DiscoveryError> {
    use redis::IntoConnectionInfo;

    // Accept both full URLs and bare host:port addresses.
    let mut info = cfg
        .address
        .as_str()
        .into_connection_info()
        .or_else(|_| format!("redis://{}", cfg.address).as_str().into_connection_info())?;

    if !cfg.user.is_empty() {
        info.redis.username = Some(cfg.user.clone());
    }
    if !cfg.pass.is_empty() {
        info.redis.password = Some(cfg.pass.clone());
    }

    Ok(info)
}

fn reply_channel_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("client-reply-{nanos}")
}

/// Validate one discovery response payload. A response missing its ID or
/// addresses aborts the enumeration.
fn parse_response(payload: &str) -> Result<NodeDescriptor, DiscoveryError> {
    let resp: DiscoveryResponse = serde_json::from_str(payload)
        .map_err(|e| DiscoveryError::InvalidResponse(format!("invalid JSON: {e}")))?;

    if resp.id.is_empty() || resp.addrs.is_empty() {
        return Err(DiscoveryError::InvalidResponse(
            "incomplete response: missing ID or addresses".to_string(),
        ));
    }

    Ok(NodeDescriptor {
        id: resp.id,
        addrs: resp.addrs,
        relay: None,
    })
}

/// Decide whether an incoming topic message deserves a response; returns the
/// reply channel if so. Non-JSON payloads and foreign actions are ignored.
fn reply_channel_for(payload: &str) -> Option<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    let req: DiscoveryRequest = match serde_json::from_str(payload) {
        Ok(req) => req,
        Err(_) => {
            warn!(payload = %payload, "discovery: ignoring non-json payload");
            return None;
        }
    };

    if req.reply.is_empty() {
        warn!(?req, "discovery: no reply topic in message, ignoring");
        return None;
    }

    if !req.action.is_empty() && req.action != ACTION_DISCOVER {
        debug!(action = %req.action, "discovery: ignoring message with action");
        return None;
    }

    Some(req.reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_matches_wire_format() {
        let req = DiscoveryRequest {
            action: "discover".to_string(),
            reply: "client-reply-1".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"discover","reply":"client-reply-1"}"#);

        let decoded: DiscoveryRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let decoded: DiscoveryRequest = serde_json::from_str(r#"{"reply":"ch"}"#).unwrap();
        assert_eq!(decoded.action, "");
        assert_eq!(decoded.reply, "ch");
    }

    #[test]
    fn parse_response_accepts_complete_answers() {
        let node =
            parse_response(r#"{"id":"12D3KooWNode","addrs":["/ip4/1.2.3.4/tcp/4001/p2p/12D3KooWNode"]}"#)
                .unwrap();
        assert_eq!(node.id, "12D3KooWNode");
        assert_eq!(node.addrs.len(), 1);
        assert_eq!(node.relay, None);
    }

    #[test]
    fn parse_response_rejects_incomplete_answers() {
        assert!(parse_response(r#"{"id":"","addrs":["/ip4/1.2.3.4/tcp/4001"]}"#).is_err());
        assert!(parse_response(r#"{"id":"12D3KooWNode","addrs":[]}"#).is_err());
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn reply_channel_for_filters_requests() {
        // Well-formed discover request.
        assert_eq!(
            reply_channel_for(r#"{"action":"discover","reply":"ch"}"#),
            Some("ch".to_string())
        );

        // Absent action is accepted for backward compatibility.
        assert_eq!(
            reply_channel_for(r#"{"reply":"ch"}"#),
            Some("ch".to_string())
        );

        // Foreign action, missing reply, junk payloads: all ignored.
        assert_eq!(reply_channel_for(r#"{"action":"announce","reply":"ch"}"#), None);
        assert_eq!(reply_channel_for(r#"{"action":"discover"}"#), None);
        assert_eq!(reply_channel_for("not json"), None);
        assert_eq!(reply_channel_for("   "), None);
    }

    #[test]
    fn reply_channel_names_are_unique() {
        let a = reply_channel_name();
        std::thread::sleep(Duration::from_millis(2));
        let b = reply_channel_name();
        assert!(a.starts_with("client-reply-"));
        assert_ne!(a, b);
    }

    #[test]
    fn connection_info_accepts_bare_addresses() {
        let cfg = Config {
            address: "localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(connection_info(&cfg).is_ok());

        let cfg = Config {
            address: "redis://localhost:6379".to_string(),
            user: "svc".to_string(),
            pass: "secret".to_string(),
            ..Default::default()
        };
        let info = connection_info(&cfg).unwrap();
        assert_eq!(info.redis.username.as_deref(), Some("svc"));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn service_requires_an_address() {
        let result = Service::new(Config::default(), None);
        assert!(matches!(result, Err(DiscoveryError::AddressRequired)));
    }

    #[test]
    fn config_from_shared_settings() {
        let shared = bethrou_config::DiscoveryConfig {
            enabled: true,
            address: "redis://localhost:6379".to_string(),
            topic: "bethrou".to_string(),
            timeout: "3s".to_string(),
            user: String::new(),
            pass: String::new(),
        };

        let cfg = Config::from(&shared);
        assert_eq!(cfg.timeout, Duration::from_secs(3));
        assert_eq!(cfg.topic, "bethrou");
    }
}
