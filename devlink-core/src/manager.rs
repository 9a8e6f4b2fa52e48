//! Connection management tying discovery, routing and the wire
//! protocol together.
//!
//! One [`CommunicationManager`] per process. It watches UDP
//! announcements, keeps the registry of connected peers, runs the
//! Hello handshake on both inbound and outbound connections, pumps
//! each peer's traffic through the [`MessageRouter`], correlates
//! responses, reconnects dropped outbound peers with capped backoff,
//! and reports everything on a [`LinkEvent`] stream.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::discovery::{
    Announcement, Announcer, DiscoveryEvent, ServiceRegistry, Watcher, DEFAULT_DISCOVERY_PORT,
    DEFAULT_SERVICE_TTL,
};
use crate::error::LinkError;
use crate::factory::MessageFactory;
use crate::message::{Command, Message, MessageKind, StatusCode};
use crate::network::{Connection, Endpoint, MessageSender};
use crate::protocol::handshake::Hello;
use crate::router::MessageRouter;
use crate::state::{ConnectionPhase, PendingRequests};

// ── Configuration ────────────────────────────────────────────────

/// Tunables for one manager instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Stable node identifier; also filters our own announcements.
    pub node_id: String,

    /// UDP port for discovery traffic.
    pub discovery_port: u16,

    /// Lease after which an unrefreshed service is expired.
    pub service_ttl: Duration,

    /// Deadline for requests and handshake replies.
    pub request_timeout: Duration,

    /// First reconnect delay after an outbound peer drops.
    pub reconnect_initial_backoff: Duration,

    /// Reconnect delay cap.
    pub reconnect_max_backoff: Duration,

    /// Service to announce from this node, if it offers one.
    pub announce: Option<Announcement>,
}

impl ManagerConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            service_ttl: DEFAULT_SERVICE_TTL,
            request_timeout: Duration::from_secs(10),
            reconnect_initial_backoff: Duration::from_millis(500),
            reconnect_max_backoff: Duration::from_secs(15),
            announce: None,
        }
    }

    pub fn with_announce(mut self, announcement: Announcement) -> Self {
        self.announce = Some(announcement);
        self
    }
}

// ── LinkEvent ────────────────────────────────────────────────────

/// Everything noteworthy the manager observes, for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A service was announced for the first time (or moved).
    ServiceDiscovered { service: String, endpoint: Endpoint },
    /// A service lease expired.
    ServiceExpired { service: String },
    /// A peer finished its handshake.
    PeerConnected { peer: String },
    /// A peer was disconnected (graceful or dropped).
    PeerDisconnected { peer: String },
    /// An outbound request went unanswered past its deadline.
    RequestTimedOut {
        sequence: u32,
        command: Command,
        waited: Duration,
    },
}

// ── Peer bookkeeping ─────────────────────────────────────────────

struct Peer {
    sender: MessageSender,
    endpoint: Endpoint,
    phase: ConnectionPhase,
}

// ── SystemHandler ────────────────────────────────────────────────

/// Built-in handler for the System service.
///
/// Ping is answered everywhere without application code; anything
/// else on the System service is connection plumbing that never
/// reaches the router.
struct SystemHandler;

#[async_trait::async_trait]
impl crate::router::ServiceHandler for SystemHandler {
    async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
        match request.command()? {
            Command::Ping => Ok((StatusCode::Ok, Vec::new())),
            _ => Ok((StatusCode::Unsupported, Vec::new())),
        }
    }
}

// ── CommunicationManager ─────────────────────────────────────────

/// Cheap-to-clone handle; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct CommunicationManager {
    config: Arc<ManagerConfig>,
    factory: Arc<MessageFactory>,
    router: Arc<MessageRouter>,
    registry: Arc<ServiceRegistry>,
    peers: Arc<Mutex<HashMap<String, Peer>>>,
    pending: Arc<Mutex<PendingRequests>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CommunicationManager {
    /// Create a manager and the event stream it reports on.
    pub fn new(config: ManagerConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut pending = PendingRequests::new();
        pending.set_default_timeout(config.request_timeout);

        let router = MessageRouter::new();
        router.register(crate::message::ServiceId::System, Arc::new(SystemHandler));

        let manager = Self {
            config: Arc::new(config),
            factory: Arc::new(MessageFactory::new()),
            router: Arc::new(router),
            registry: Arc::new(ServiceRegistry::new()),
            peers: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(pending)),
            events_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        (manager, events_rx)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Owned handle to the registry, for handlers that outlive `&self`.
    pub fn registry_handle(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn is_peer_connected(&self, peer: &str) -> bool {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .contains_key(peer)
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Endpoint of a connected peer, if any.
    pub fn peer_endpoint(&self, peer: &str) -> Option<Endpoint> {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .get(peer)
            .map(|p| p.endpoint.clone())
    }

    // ── Background tasks ─────────────────────────────────────────

    /// Start the discovery watcher, the lease/timeout sweeper and —
    /// if configured — the announcer.
    pub fn start(&self) {
        let (disc_tx, mut disc_rx) = mpsc::unbounded_channel();

        let watcher = Watcher::new(self.config.discovery_port)
            .ignoring_node(self.config.node_id.clone());
        let watcher_handle = watcher.spawn(self.registry.clone(), disc_tx.clone());

        // Map discovery events onto the application event stream.
        let events = self.events_tx.clone();
        let forward_handle = tokio::spawn(async move {
            while let Some(event) = disc_rx.recv().await {
                let mapped = match event {
                    DiscoveryEvent::ServiceUp { service, endpoint } => {
                        LinkEvent::ServiceDiscovered { service, endpoint }
                    }
                    DiscoveryEvent::ServiceDown { service } => {
                        LinkEvent::ServiceExpired { service }
                    }
                };
                if events.send(mapped).is_err() {
                    break;
                }
            }
        });

        // Sweep expired service leases and timed-out requests.
        let sweeper = self.clone();
        let sweep_handle = tokio::spawn(async move {
            let period = (sweeper.config.service_ttl / 2).max(Duration::from_millis(200));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                for entry in sweeper.registry.sweep_expired(sweeper.config.service_ttl) {
                    debug!(service = %entry.announcement.service, "service lease expired");
                    let _ = disc_tx.send(DiscoveryEvent::ServiceDown {
                        service: entry.announcement.service,
                    });
                }
                let expired = sweeper
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .drain_expired();
                for request in expired {
                    let _ = sweeper.events_tx.send(LinkEvent::RequestTimedOut {
                        sequence: request.sequence,
                        command: request.command,
                        waited: request.waited,
                    });
                }
            }
        });

        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        tasks.push(watcher_handle);
        tasks.push(forward_handle);
        tasks.push(sweep_handle);

        if let Some(announcement) = self.config.announce.clone() {
            let target = SocketAddr::from((Ipv4Addr::BROADCAST, self.config.discovery_port));
            tasks.push(Announcer::new(announcement).with_target(target).spawn());
        }
    }

    /// Stop every background task and drop all peers.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        self.peers.lock().expect("peers lock poisoned").clear();
        self.pending.lock().expect("pending lock poisoned").clear();
        info!("communication manager shut down");
    }

    // ── Listening side ───────────────────────────────────────────

    /// Accept inbound peers on `bind` (e.g. `"0.0.0.0:9400"`).
    ///
    /// Returns the bound address, useful with port 0.
    pub async fn listen(&self, bind: &str) -> Result<SocketAddr, LinkError> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening for peers");

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.accept_peer(stream, peer_addr).await {
                                warn!(%peer_addr, "inbound handshake failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        break;
                    }
                }
            }
        });
        self.tasks.lock().expect("tasks lock poisoned").push(handle);
        Ok(addr)
    }

    /// Responder half of the Hello handshake, then the peer loop.
    async fn accept_peer(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<(), LinkError> {
        let mut phase = ConnectionPhase::default();
        phase.begin_connect()?;
        phase.begin_handshake()?;

        let mut conn = Connection::new(stream);
        let request = self.await_message(&mut conn).await?;
        if request.kind()? != MessageKind::Request || request.command()? != Command::Hello {
            return Err(LinkError::ProtocolViolation("expected Hello request"));
        }

        let hello = Hello::from_bytes(request.payload())?;
        if let Err(e) = hello.check_version() {
            // Tell the peer why before giving up on it.
            let refusal =
                self.factory
                    .response_to(&request, StatusCode::Unsupported, Vec::new())?;
            let _ = conn.send(refusal).await;
            return Err(e);
        }

        let reply = Hello::new(self.config.node_id.clone(), self.offered_services());
        let response = self
            .factory
            .response_to(&request, StatusCode::Ok, reply.to_bytes()?)?;
        conn.send(response).await?;
        phase.complete_handshake()?;

        let name = hello.node.clone();
        let endpoint = Endpoint::new(peer_addr.ip().to_string(), peer_addr.port());
        info!(peer = %name, %endpoint, "peer connected");
        self.register_peer(&name, conn.sender(), endpoint, phase);
        let _ = self
            .events_tx
            .send(LinkEvent::PeerConnected { peer: name.clone() });

        // Inbound peers are not reconnected from our side.
        self.clone().peer_task(name, conn, false).await;
        Ok(())
    }

    // ── Dialing side ─────────────────────────────────────────────

    /// Connect to an announced service by name.
    ///
    /// Resolves the endpoint through the registry, runs the Hello
    /// handshake as initiator, registers the peer under the service
    /// name, and keeps reconnecting with capped backoff if the link
    /// drops while the service is still announced.
    pub async fn connect(&self, service: &str) -> Result<(), LinkError> {
        if self.is_peer_connected(service) {
            return Ok(());
        }
        let conn = self.dial(service).await?;
        let manager = self.clone();
        let name = service.to_string();
        let handle = tokio::spawn(async move {
            manager.peer_task(name, conn, true).await;
        });
        self.tasks.lock().expect("tasks lock poisoned").push(handle);
        Ok(())
    }

    /// Send Bye and drop the peer. No reconnect follows.
    pub async fn disconnect(&self, peer: &str) -> Result<(), LinkError> {
        let sender = self
            .peer_sender(peer)
            .ok_or_else(|| LinkError::PeerNotConnected(peer.to_string()))?;
        let bye = self.factory.notify(Command::Bye, Vec::new())?;
        // Best effort; the peer may already be gone.
        let _ = sender.send(bye).await;
        self.remove_peer(peer);
        Ok(())
    }

    async fn dial(&self, service: &str) -> Result<Connection, LinkError> {
        let entry = self
            .registry
            .get(service)
            .ok_or_else(|| LinkError::ServiceUnknown(service.to_string()))?;
        let endpoint = entry.endpoint();

        let mut phase = ConnectionPhase::default();
        phase.begin_connect()?;
        let mut conn = Connection::connect(&endpoint).await?;
        phase.begin_handshake()?;

        let hello = Hello::new(self.config.node_id.clone(), self.offered_services());
        conn.send(hello.into_request(&self.factory)?).await?;

        let reply = self.await_message(&mut conn).await?;
        if reply.kind()? != MessageKind::Response || reply.command()? != Command::Hello {
            return Err(LinkError::ProtocolViolation("expected Hello response"));
        }
        let status = reply.status()?;
        if !status.is_ok() {
            return Err(LinkError::RemoteStatus(status));
        }
        let peer_hello = Hello::from_bytes(reply.payload())?;
        peer_hello.check_version()?;
        phase.complete_handshake()?;

        info!(peer = %service, %endpoint, node = %peer_hello.node, "peer connected");
        self.register_peer(service, conn.sender(), endpoint, phase);
        let _ = self.events_tx.send(LinkEvent::PeerConnected {
            peer: service.to_string(),
        });
        Ok(conn)
    }

    /// Next non-heartbeat message, bounded by the request timeout.
    async fn await_message(&self, conn: &mut Connection) -> Result<Message, LinkError> {
        let timeout = self.config.request_timeout;
        let received = tokio::time::timeout(timeout, async {
            loop {
                match conn.recv().await {
                    Some(m) if m.is_heartbeat() => continue,
                    other => return other,
                }
            }
        })
        .await
        .map_err(|_| LinkError::Timeout(timeout))?;
        received.ok_or(LinkError::ChannelClosed)
    }

    // ── Peer loop ────────────────────────────────────────────────

    /// Pump one peer until it drops or says Bye, reconnecting
    /// outbound peers while their service stays announced.
    async fn peer_task(self, name: String, mut conn: Connection, outbound: bool) {
        loop {
            let graceful = self.run_peer(&name, &mut conn).await;
            let was_registered = self.remove_peer(&name);
            if graceful || !outbound || !was_registered {
                return;
            }
            match self.reconnect(&name).await {
                Some(new_conn) => conn = new_conn,
                None => return,
            }
        }
    }

    /// Returns `true` on a graceful Bye, `false` on a dropped link.
    async fn run_peer(&self, name: &str, conn: &mut Connection) -> bool {
        while let Some(message) = conn.recv().await {
            match message.kind() {
                Ok(MessageKind::Request) => {
                    match self.router.dispatch_request(&message).await {
                        Ok(response) => {
                            if conn.send(response).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(peer = %name, "failed to build response: {e}"),
                    }
                }
                Ok(MessageKind::Response) => {
                    let sequence = message.sequence();
                    let completed = self
                        .pending
                        .lock()
                        .expect("pending lock poisoned")
                        .complete(sequence, message);
                    if !completed {
                        debug!(peer = %name, sequence, "late or unsolicited response");
                    }
                }
                Ok(MessageKind::Notify) => {
                    if message.is_heartbeat() {
                        trace!(peer = %name, "heartbeat");
                        continue;
                    }
                    if message.command().ok() == Some(Command::Bye) {
                        info!(peer = %name, "peer said bye");
                        return true;
                    }
                    self.router.dispatch_notify(message);
                }
                Err(e) => {
                    warn!(peer = %name, "dropping message with unknown kind: {e}");
                }
            }
        }
        false
    }

    /// Redial a dropped service with capped exponential backoff.
    ///
    /// Gives up once the service's lease expires.
    async fn reconnect(&self, service: &str) -> Option<Connection> {
        let mut backoff = self.config.reconnect_initial_backoff;
        loop {
            tokio::time::sleep(backoff).await;
            if self.registry.get(service).is_none() {
                info!(peer = %service, "service no longer announced; giving up reconnect");
                return None;
            }
            match self.dial(service).await {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    debug!(peer = %service, "reconnect attempt failed: {e}");
                    backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
                }
            }
        }
    }

    // ── Requests and broadcast ───────────────────────────────────

    /// Send a request to a connected peer and await its response.
    ///
    /// The response is returned whatever its status; callers inspect
    /// [`Message::status`].
    pub async fn request(
        &self,
        peer: &str,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<Message, LinkError> {
        let sender = self
            .peer_sender(peer)
            .ok_or_else(|| LinkError::PeerNotConnected(peer.to_string()))?;

        let message = self.factory.request(command, payload)?;
        let sequence = message.sequence();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .track(sequence, command, reply_tx);

        if let Err(e) = sender.send(message).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .cancel(sequence);
            return Err(e.into());
        }

        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the sweeper expired us or the link died.
            Ok(Err(_)) => Err(LinkError::Timeout(timeout)),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .cancel(sequence);
                Err(LinkError::Timeout(timeout))
            }
        }
    }

    /// Fan one notify (broadcast flag set) out to every connected
    /// peer. Returns how many peers accepted it.
    pub async fn broadcast(&self, command: Command, payload: Vec<u8>) -> Result<usize, LinkError> {
        let message = self.factory.broadcast(command, payload)?;
        let targets: Vec<(String, MessageSender)> = {
            let peers = self.peers.lock().expect("peers lock poisoned");
            peers
                .iter()
                .map(|(name, peer)| (name.clone(), peer.sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (name, sender) in targets {
            if sender.send(message.clone()).await.is_err() {
                warn!(peer = %name, "broadcast delivery failed");
            } else {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    // ── Internals ────────────────────────────────────────────────

    fn offered_services(&self) -> Vec<String> {
        self.config
            .announce
            .as_ref()
            .map(|a| vec![a.service.clone()])
            .unwrap_or_default()
    }

    fn register_peer(
        &self,
        name: &str,
        sender: MessageSender,
        endpoint: Endpoint,
        phase: ConnectionPhase,
    ) {
        self.peers.lock().expect("peers lock poisoned").insert(
            name.to_string(),
            Peer {
                sender,
                endpoint,
                phase,
            },
        );
    }

    /// Deregister and report; `false` when the peer was already gone
    /// (explicit disconnect).
    fn remove_peer(&self, name: &str) -> bool {
        let removed = self
            .peers
            .lock()
            .expect("peers lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            let _ = self.events_tx.send(LinkEvent::PeerDisconnected {
                peer: name.to_string(),
            });
        }
        removed
    }

    fn peer_sender(&self, name: &str) -> Option<MessageSender> {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .get(name)
            .map(|p| p.sender.clone())
    }

    /// Connected-phase uptime of a peer, if it is connected.
    pub fn peer_uptime(&self, name: &str) -> Option<Duration> {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .get(name)
            .and_then(|p| p.phase.connected_duration())
    }
}

// ── Tests ────────────────────────────────────────────────────────
