//! Center core logic — auto-connecting to discovered agents and
//! serving the registry service.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use devlink_core::protocol::registry::{ServiceList, ServiceSummary};
use devlink_core::{
    Command, CommunicationManager, LinkError, LinkEvent, Message, ServiceHandler, ServiceId,
    ServiceRegistry, StatusCode,
};

use crate::config::CenterConfig;

// ── RegistryHandler ──────────────────────────────────────────────

/// Serves `ListServices` from the live discovery registry.
struct RegistryHandler {
    registry: Arc<ServiceRegistry>,
}

#[async_trait]
impl ServiceHandler for RegistryHandler {
    async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
        match request.command()? {
            Command::ListServices => {
                let list = ServiceList {
                    services: self
                        .registry
                        .snapshot()
                        .iter()
                        .map(ServiceSummary::from)
                        .collect(),
                };
                Ok((StatusCode::Ok, list.to_bytes()?))
            }
            _ => Ok((StatusCode::UnknownCommand, Vec::new())),
        }
    }
}

// ── Center ───────────────────────────────────────────────────────

/// The device center: watches announcements, dials every discovered
/// agent, pings peers and relays link events to the log.
pub struct Center {
    config: CenterConfig,
    manager: CommunicationManager,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Center {
    pub fn new(config: CenterConfig) -> Self {
        let (manager, events) = CommunicationManager::new(config.to_manager_config());
        manager.router().register(
            ServiceId::Registry,
            Arc::new(RegistryHandler {
                registry: manager.registry_handle(),
            }),
        );
        Self {
            config,
            manager,
            events,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.manager.start();
        info!(
            node = %self.manager.node_id(),
            discovery_port = self.config.network.discovery_port,
            "center started"
        );

        let manager = self.manager.clone();
        let mut ping_interval = tokio::time::interval(self.config.ping_interval());

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => Self::handle_event(&manager, event).await,
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    Self::ping_peers(&manager);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received — shutting down");
                    break;
                }
            }
        }

        for peer in self.manager.peer_names() {
            if let Err(e) = self.manager.disconnect(&peer).await {
                warn!(%peer, "disconnect failed: {e}");
            }
        }
        self.manager.shutdown();
        Ok(())
    }

    async fn handle_event(manager: &CommunicationManager, event: LinkEvent) {
        match event {
            LinkEvent::ServiceDiscovered { service, endpoint } => {
                info!(%service, %endpoint, "service discovered");
                if let Err(e) = manager.connect(&service).await {
                    warn!(%service, "connect failed: {e}");
                }
            }
            LinkEvent::ServiceExpired { service } => {
                info!(%service, "service lease expired");
            }
            LinkEvent::PeerConnected { peer } => {
                info!(%peer, "agent connected");
            }
            LinkEvent::PeerDisconnected { peer } => {
                info!(%peer, "agent disconnected");
            }
            LinkEvent::RequestTimedOut {
                sequence,
                command,
                waited,
            } => {
                warn!(sequence, %command, ?waited, "request timed out");
            }
        }
    }

    /// Fire a liveness ping at every connected agent.
    fn ping_peers(manager: &CommunicationManager) {
        for peer in manager.peer_names() {
            let manager = manager.clone();
            tokio::spawn(async move {
                match manager.request(&peer, Command::Ping, Vec::new()).await {
                    Ok(response) => match response.status() {
                        Ok(status) if status.is_ok() => {
                            tracing::debug!(%peer, "ping ok");
                        }
                        Ok(status) => warn!(%peer, %status, "ping refused"),
                        Err(e) => warn!(%peer, "ping response malformed: {e}"),
                    },
                    Err(e) => warn!(%peer, "ping failed: {e}"),
                }
            });
        }
    }
}
