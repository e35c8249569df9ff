//! Background health probe loop.
//!
//! Periodically pings every pool member and writes the measured latency
//! back. Unreachable peers get the unhealthy sentinel so the fastest
//! strategy routes around them; they are never removed and recover on a
//! later successful probe.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::pool::UNHEALTHY_LATENCY;

/// Slack added to the configured probe timeout so slow-but-alive nodes are
/// not misclassified.
const PROBE_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Run probes every `interval` until cancelled. Callers must not start the
/// loop with a zero interval; the supervisor skips it in that case.
pub async fn run(
    client: Client,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    info!(?interval, ?timeout, "Starting health checks");

    let mut ticker = tokio::time::interval(interval);
    // Probes slower than the interval delay the next tick instead of
    // queueing up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full interval instead.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => probe_all(&client, timeout).await,
        }
    }
}

async fn probe_all(client: &Client, timeout: Duration) {
    for conn in client.pool().all() {
        debug!(peer = %conn.peer_id, addr = %conn.addr, "Pinging node");

        let probe = tokio::time::timeout(
            timeout + PROBE_SAFETY_MARGIN,
            client.ping(conn.peer_id),
        )
        .await;

        match probe {
            Ok(Ok(latency)) => {
                debug!(peer = %conn.peer_id, ?latency, "Node healthy");
                client.pool().update_latency(conn.peer_id, latency);
            }
            Ok(Err(e)) => {
                warn!(peer = %conn.peer_id, error = %e, "Health check failed");
                client.pool().update_latency(conn.peer_id, UNHEALTHY_LATENCY);
            }
            Err(_) => {
                warn!(peer = %conn.peer_id, "Health check timed out");
                client.pool().update_latency(conn.peer_id, UNHEALTHY_LATENCY);
            }
        }
    }
}
