//! UDP broadcast service discovery.
//!
//! Services make themselves known by broadcasting a small JSON
//! [`Announcement`] datagram on the discovery port at a fixed interval.
//! Consumers run a [`Watcher`] that feeds a [`ServiceRegistry`], where
//! each service holds a lease refreshed by every announcement and
//! swept out once it goes stale.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::frame::PROTOCOL_VERSION;
use crate::network::Endpoint;

/// Port announcements are broadcast on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 37020;

/// Interval between announcements.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Lease: a service older than this is considered gone.
pub const DEFAULT_SERVICE_TTL: Duration = Duration::from_secs(6);

// ── Announcement ─────────────────────────────────────────────────

/// One discovery datagram: who is offering what, and where.
///
/// Serialized as JSON so announcements stay inspectable with tcpdump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Service name consumers connect by (e.g. `"line-scanner-3"`).
    pub service: String,
    /// Stable identifier of the announcing node; used to filter our
    /// own datagrams looped back by the OS.
    pub node_id: String,
    /// Protocol version the service speaks.
    pub version: u8,
    /// TCP port the service accepts connections on.
    pub port: u16,
    /// Human-readable device model, for operator logs.
    pub model: String,
}

impl Announcement {
    pub fn new(
        service: impl Into<String>,
        node_id: impl Into<String>,
        port: u16,
        model: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            node_id: node_id.into(),
            version: PROTOCOL_VERSION,
            port,
            model: model.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── ServiceRegistry ──────────────────────────────────────────────

/// A live entry in the registry.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub announcement: Announcement,
    /// Source address the announcement arrived from.
    pub addr: IpAddr,
    pub last_seen: Instant,
}

impl ServiceEntry {
    /// Where to dial this service: announcement port at the datagram's
    /// source address.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.to_string(), self.announcement.port)
    }

    pub fn age(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// What `observe` did with an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time this service name was seen (or it moved host/port).
    New,
    /// Known service, lease refreshed.
    Refreshed,
}

/// Announced services keyed by name, with lease expiry.
///
/// Interior mutability so the watcher task, the sweeper and API
/// callers can share one registry behind an `Arc`.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    inner: Mutex<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement, refreshing the lease.
    ///
    /// A changed address or port replaces the stale entry and counts
    /// as [`Observation::New`] so consumers re-dial.
    pub fn observe(&self, announcement: Announcement, addr: IpAddr) -> Observation {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let name = announcement.service.clone();
        let moved = inner
            .get(&name)
            .map(|e| e.addr != addr || e.announcement.port != announcement.port)
            .unwrap_or(true);

        inner.insert(
            name,
            ServiceEntry {
                announcement,
                addr,
                last_seen: Instant::now(),
            },
        );

        if moved {
            Observation::New
        } else {
            Observation::Refreshed
        }
    }

    /// Look up a live service by name.
    pub fn get(&self, service: &str) -> Option<ServiceEntry> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .get(service)
            .cloned()
    }

    /// All currently known services.
    pub fn snapshot(&self) -> Vec<ServiceEntry> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a service explicitly (it said Bye).
    pub fn remove(&self, service: &str) -> Option<ServiceEntry> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .remove(service)
    }

    /// Remove every entry whose lease is older than `ttl`.
    ///
    /// Returns the expired entries so callers can emit events.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<ServiceEntry> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| entry.age() > ttl)
            .map(|(name, _)| name.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|name| inner.remove(&name))
            .collect()
    }
}

// ── DiscoveryEvent ───────────────────────────────────────────────

/// Emitted by the watcher and the expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A service appeared (or moved to a new address).
    ServiceUp {
        service: String,
        endpoint: Endpoint,
    },
    /// A service lease expired.
    ServiceDown { service: String },
}

// ── Announcer ────────────────────────────────────────────────────

/// Periodically broadcasts one announcement datagram.
pub struct Announcer {
    announcement: Announcement,
    target: SocketAddr,
    interval: Duration,
}

impl Announcer {
    /// Announce on the default broadcast address and port.
    pub fn new(announcement: Announcement) -> Self {
        Self {
            announcement,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_DISCOVERY_PORT)),
            interval: DEFAULT_ANNOUNCE_INTERVAL,
        }
    }

    /// Override the destination (unicast in tests, subnet broadcast in
    /// segmented networks).
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Broadcast until the task is aborted or the socket dies.
    pub async fn run(self) -> Result<(), LinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;

        let bytes = self.announcement.to_bytes()?;
        let mut interval = tokio::time::interval(self.interval);
        debug!(
            service = %self.announcement.service,
            target = %self.target,
            "announcer started"
        );
        loop {
            interval.tick().await;
            if let Err(e) = socket.send_to(&bytes, self.target).await {
                warn!("announce send failed: {e}");
            }
        }
    }

    /// Spawn [`Announcer::run`] on the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                warn!("announcer stopped: {e}");
            }
        })
    }
}

// ── Watcher ──────────────────────────────────────────────────────

/// Listens for announcement datagrams and feeds the registry.
pub struct Watcher {
    port: u16,
    /// Announcements from this node id are our own loopback and are
    /// dropped.
    own_node_id: Option<String>,
}

impl Watcher {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            own_node_id: None,
        }
    }

    pub fn ignoring_node(mut self, node_id: impl Into<String>) -> Self {
        self.own_node_id = Some(node_id.into());
        self
    }

    /// Receive datagrams forever, updating `registry` and reporting
    /// new services on `events`.
    pub async fn run(
        self,
        registry: std::sync::Arc<ServiceRegistry>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<(), LinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", self.port)).await?;
        debug!(port = self.port, "discovery watcher started");

        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            let announcement = match Announcement::from_bytes(&buf[..len]) {
                Ok(a) => a,
                Err(e) => {
                    trace!("malformed announcement from {from}: {e}");
                    continue;
                }
            };

            if self.own_node_id.as_deref() == Some(announcement.node_id.as_str()) {
                continue; // our own datagram looped back
            }
            if announcement.version != PROTOCOL_VERSION {
                trace!(
                    service = %announcement.service,
                    version = announcement.version,
                    "ignoring incompatible announcement"
                );
                continue;
            }

            let service = announcement.service.clone();
            let port = announcement.port;
            if registry.observe(announcement, from.ip()) == Observation::New {
                let endpoint = Endpoint::new(from.ip().to_string(), port);
                debug!(%service, %endpoint, "service discovered");
                if events
                    .send(DiscoveryEvent::ServiceUp { service, endpoint })
                    .is_err()
                {
                    // Receiver gone — nobody is watching anymore.
                    return Ok(());
                }
            }
        }
    }

    /// Spawn [`Watcher::run`] on the runtime.
    pub fn spawn(
        self,
        registry: std::sync::Arc<ServiceRegistry>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(registry, events).await {
                warn!("discovery watcher stopped: {e}");
            }
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
