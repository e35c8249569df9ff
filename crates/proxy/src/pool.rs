//! Connection pool for exit nodes.
//!
//! A thread-safe, ordered set of live exit-node connections plus the
//! selection strategy used to route new requests. Streams are opened per
//! request; the pool only tracks peers and their probed latencies.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use libp2p::PeerId;
use rand::Rng;

/// Latency sentinel written by the health loop for unreachable peers.
/// Deprioritizes a node without removing it, so it can recover on a later
/// successful probe.
pub const UNHEALTHY_LATENCY: Duration = Duration::from_secs(60 * 60);

/// Routing strategy for picking an exit node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolStrategy {
    #[default]
    Random,
    Fastest,
    RoundRobin,
}

impl PoolStrategy {
    /// Parse a config string. Unknown values fall back to `Random`.
    pub fn parse(s: &str) -> Self {
        match s {
            "fastest" | "latency" => Self::Fastest,
            "round-robin" => Self::RoundRobin,
            _ => Self::Random,
        }
    }
}

impl fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Random => "random",
            Self::Fastest => "fastest",
            Self::RoundRobin => "round-robin",
        };
        f.write_str(s)
    }
}

/// A live pool entry for one exit node.
#[derive(Debug, Clone)]
pub struct Connection {
    pub peer_id: PeerId,
    /// The address the dial actually succeeded on.
    pub addr: String,
    pub latency: Duration,
    /// Whether the most recent probe succeeded. True until proven otherwise.
    pub last_probe_ok: bool,
}

#[derive(Default)]
struct PoolInner {
    conns: Vec<Connection>,
    strategy: PoolStrategy,
    rr_index: usize,
}

/// Thread-safe pool of exit-node connections.
pub struct Pool {
    inner: RwLock<PoolInner>,
}

impl Pool {
    pub fn new(strategy: PoolStrategy) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                conns: Vec::new(),
                strategy,
                rr_index: 0,
            }),
        }
    }

    pub fn set_strategy(&self, strategy: PoolStrategy) {
        self.write().strategy = strategy;
    }

    pub fn get_strategy(&self) -> PoolStrategy {
        self.read().strategy
    }

    /// Append a connection with zero latency. No dedup.
    pub fn add(&self, peer_id: PeerId, addr: impl Into<String>) {
        self.write().conns.push(Connection {
            peer_id,
            addr: addr.into(),
            latency: Duration::ZERO,
            last_probe_ok: true,
        });
    }

    /// Remove the first entry matching `peer_id`.
    pub fn remove(&self, peer_id: PeerId) {
        let mut inner = self.write();
        if let Some(pos) = inner.conns.iter().position(|c| c.peer_id == peer_id) {
            inner.conns.remove(pos);
        }
    }

    /// Snapshot of the pool, safe to iterate without holding any lock.
    pub fn all(&self) -> Vec<Connection> {
        self.read().conns.clone()
    }

    pub fn size(&self) -> usize {
        self.read().conns.len()
    }

    pub fn clear(&self) {
        self.write().conns.clear();
    }

    /// Set the latency on the first entry matching `peer_id`; no-op when the
    /// peer is not pooled.
    pub fn update_latency(&self, peer_id: PeerId, latency: Duration) {
        let mut inner = self.write();
        if let Some(conn) = inner.conns.iter_mut().find(|c| c.peer_id == peer_id) {
            conn.latency = latency;
            conn.last_probe_ok = latency < UNHEALTHY_LATENCY;
        }
    }

    pub fn select_random(&self) -> Option<Connection> {
        let inner = self.read();
        pick_random(&inner.conns)
    }

    /// The connection with the smallest positive latency. Falls back to a
    /// uniform pick when no probe has completed yet.
    pub fn select_fastest(&self) -> Option<Connection> {
        let inner = self.read();

        inner
            .conns
            .iter()
            .filter(|c| c.latency > Duration::ZERO)
            .min_by_key(|c| c.latency)
            .cloned()
            .or_else(|| pick_random(&inner.conns))
    }

    pub fn select_round_robin(&self) -> Option<Connection> {
        let mut inner = self.write();
        if inner.conns.is_empty() {
            return None;
        }

        let idx = inner.rr_index % inner.conns.len();
        let conn = inner.conns[idx].clone();
        inner.rr_index = (idx + 1) % inner.conns.len();

        Some(conn)
    }

    pub fn select_by_strategy(&self, strategy: PoolStrategy) -> Option<Connection> {
        match strategy {
            PoolStrategy::Random => self.select_random(),
            PoolStrategy::Fastest => self.select_fastest(),
            PoolStrategy::RoundRobin => self.select_round_robin(),
        }
    }

    /// Select using the pool's current strategy.
    pub fn select(&self) -> Option<Connection> {
        self.select_by_strategy(self.get_strategy())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PoolInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PoolInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn pick_random(conns: &[Connection]) -> Option<Connection> {
    if conns.is_empty() {
        return None;
    }

    let idx = rand::thread_rng().gen_range(0..conns.len());
    Some(conns[idx].clone())
}
