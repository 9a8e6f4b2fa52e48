//! Agent core logic — the device model and its request handler.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use devlink_core::protocol::device::{DeviceInfo, DeviceState, DeviceStatus};
use devlink_core::protocol::event::StateChanged;
use devlink_core::{
    Command, CommunicationManager, LinkError, LinkEvent, Message, ServiceHandler, ServiceId,
    StatusCode,
};

use crate::config::AgentConfig;

// ── DeviceModel ──────────────────────────────────────────────────

/// The agent's view of the device it fronts.
pub struct DeviceModel {
    info: DeviceInfo,
    state: Mutex<DeviceState>,
    last_error: Mutex<Option<String>>,
    started: Instant,
}

impl DeviceModel {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            state: Mutex::new(DeviceState::Idle),
            last_error: Mutex::new(None),
            started: Instant::now(),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Transition to `next`; returns the change when one happened.
    pub fn set_state(&self, next: DeviceState) -> Option<(DeviceState, DeviceState)> {
        let mut state = self.state.lock().expect("state lock poisoned");
        let previous = *state;
        if previous == next {
            return None;
        }
        *state = next;
        Some((previous, next))
    }

    pub fn set_error(&self, error: impl Into<String>) {
        *self.last_error.lock().expect("error lock poisoned") = Some(error.into());
    }

    pub fn status(&self) -> DeviceStatus {
        let mut status = DeviceStatus::new(self.state(), self.started.elapsed().as_secs());
        if let Some(error) = self
            .last_error
            .lock()
            .expect("error lock poisoned")
            .clone()
        {
            status = status.with_error(error);
        }
        status
    }
}

// ── DeviceHandler ────────────────────────────────────────────────

/// Serves the Device service from the model.
struct DeviceHandler {
    device: Arc<DeviceModel>,
}

#[async_trait]
impl ServiceHandler for DeviceHandler {
    async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
        match request.command()? {
            Command::DeviceInfo => Ok((StatusCode::Ok, self.device.info().to_bytes()?)),
            Command::DeviceState => Ok((StatusCode::Ok, self.device.status().to_bytes()?)),
            _ => Ok((StatusCode::UnknownCommand, Vec::new())),
        }
    }
}

// ── Agent ────────────────────────────────────────────────────────

/// The device agent: announces its service, serves device requests
/// and pushes state-change notifications.
pub struct Agent {
    config: AgentConfig,
    manager: CommunicationManager,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    device: Arc<DeviceModel>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let (manager, events) = CommunicationManager::new(config.to_manager_config());
        let device = Arc::new(DeviceModel::new(DeviceInfo {
            model: config.device.model.clone(),
            serial: config.device.serial.clone(),
            firmware: config.device.firmware.clone(),
            vendor: config.device.vendor.clone(),
        }));
        manager.router().register(
            ServiceId::Device,
            Arc::new(DeviceHandler {
                device: device.clone(),
            }),
        );
        Self {
            config,
            manager,
            events,
            device,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.manager.start();
        let addr = self
            .manager
            .listen(&format!("0.0.0.0:{}", self.config.network.listen_port))
            .await?;
        info!(
            node = %self.manager.node_id(),
            service = %self.config.agent.service,
            %addr,
            "agent started"
        );

        let manager = self.manager.clone();
        let device = self.device.clone();
        let service = self.config.agent.service.clone();
        let simulate = self.config.device.simulate;
        let mut simulate_interval = tokio::time::interval(self.config.simulate_interval());

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => Self::handle_event(&manager, &service, event).await,
                        None => break,
                    }
                }
                _ = simulate_interval.tick(), if simulate => {
                    Self::toggle_state(&manager, &device, &service).await;
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

    async fn handle_event(manager: &CommunicationManager, service: &str, event: LinkEvent) {
        match event {
            LinkEvent::PeerConnected { peer } => {
                info!(%peer, "center connected");
                // Tell the new peer set that this service is live.
                let payload = service.as_bytes().to_vec();
                if let Err(e) = manager.broadcast(Command::ServiceOnline, payload).await {
                    warn!("online notify failed: {e}");
                }
            }
            LinkEvent::PeerDisconnected { peer } => {
                info!(%peer, "center disconnected");
            }
            LinkEvent::RequestTimedOut {
                sequence, command, ..
            } => {
                warn!(sequence, %command, "request timed out");
            }
            // Agents do not dial, so discovery events are informational.
            LinkEvent::ServiceDiscovered { service, .. } => {
                tracing::debug!(%service, "sibling service announced");
            }
            LinkEvent::ServiceExpired { service } => {
                tracing::debug!(%service, "sibling service expired");
            }
        }
    }

    /// Demo mode: flip between Idle and Acquiring and notify peers.
    async fn toggle_state(manager: &CommunicationManager, device: &DeviceModel, service: &str) {
        let next = match device.state() {
            DeviceState::Idle => DeviceState::Acquiring,
            DeviceState::Acquiring | DeviceState::Fault => DeviceState::Idle,
        };
        if let Some((previous, current)) = device.set_state(next) {
            info!(%previous, %current, "device state changed");
            let event = StateChanged::new(service, previous, current);
            match event.to_bytes() {
                Ok(payload) => {
                    if let Err(e) = manager.broadcast(Command::StateChanged, payload).await {
                        warn!("state notify failed: {e}");
                    }
                }
                Err(e) => warn!("state payload encode failed: {e}"),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
