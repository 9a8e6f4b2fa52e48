//! Integration tests — full connection lifecycle, manager-to-manager
//! round-trips, discovery and reconnect over real sockets on
//! localhost.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use devlink_core::protocol::device::{DeviceInfo, DeviceState, DeviceStatus};
use devlink_core::protocol::handshake::Hello;
use devlink_core::{
    Announcement, Announcer, Command, CommunicationManager, Connection, Endpoint, LinkError,
    LinkEvent, ManagerConfig, Message, MessageKind, ServiceHandler, ServiceId, ServiceRegistry,
    StatusCode, Watcher,
};

// ── Helpers ──────────────────────────────────────────────────────

/// Spin up a listener on an OS-assigned port and return it with the
/// endpoint to dial.
async fn ephemeral_listener() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = Endpoint::new(addr.ip().to_string(), addr.port());
    (listener, endpoint)
}

/// Receive the next non-heartbeat message, skipping any keep-alives
/// that arrive first.
async fn recv_skip_heartbeat(conn: &mut Connection) -> Option<Message> {
    loop {
        let msg = conn.recv().await?;
        if !msg.is_heartbeat() {
            return Some(msg);
        }
        // heartbeat — skip
    }
}

/// Manager config tuned for fast tests.
fn test_config(node: &str) -> ManagerConfig {
    let mut config = ManagerConfig::new(node);
    config.request_timeout = Duration::from_secs(5);
    config.reconnect_initial_backoff = Duration::from_millis(50);
    config.reconnect_max_backoff = Duration::from_millis(200);
    config
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// A device service answering identity and status queries.
struct TestDeviceHandler;

#[async_trait]
impl ServiceHandler for TestDeviceHandler {
    async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
        match request.command()? {
            Command::DeviceInfo => {
                let info = DeviceInfo {
                    model: "LNX-2300".into(),
                    serial: "A73-00142".into(),
                    firmware: "2.4.1".into(),
                    vendor: "Lumina".into(),
                };
                Ok((StatusCode::Ok, info.to_bytes()?))
            }
            Command::DeviceState => {
                let status = DeviceStatus::new(DeviceState::Idle, 12);
                Ok((StatusCode::Ok, status.to_bytes()?))
            }
            _ => Ok((StatusCode::UnknownCommand, Vec::new())),
        }
    }
}

/// Register a fake announcement so the center can resolve the agent
/// without real UDP traffic.
fn seed_registry(registry: &ServiceRegistry, service: &str, addr: SocketAddr) {
    registry.observe(
        Announcement::new(service, "agent-01", addr.port(), "LNX-2300"),
        addr.ip(),
    );
}

// ── Connection lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn test_connection_lifecycle() {
    let (listener, endpoint) = ephemeral_listener().await;

    let dial_handle = tokio::spawn({
        let endpoint = endpoint.clone();
        async move { Connection::connect(&endpoint).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut server_conn = Connection::new(stream);
    let mut client_conn = dial_handle.await.unwrap();

    // Client sends a Ping request
    let ping = Message::request(1, Command::Ping, Vec::new()).unwrap();
    client_conn.send(ping).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), recv_skip_heartbeat(&mut server_conn))
        .await
        .expect("timeout")
        .expect("recv returned None");

    assert_eq!(msg.sequence(), 1);
    assert_eq!(msg.command().unwrap(), Command::Ping);
    assert_eq!(msg.kind().unwrap(), MessageKind::Request);

    // Server responds
    let pong = Message::response(1, Command::Ping, StatusCode::Ok, b"pong".to_vec()).unwrap();
    server_conn.send(pong).await.unwrap();

    let resp = tokio::time::timeout(Duration::from_secs(5), recv_skip_heartbeat(&mut client_conn))
        .await
        .expect("timeout")
        .expect("recv returned None");

    assert_eq!(resp.sequence(), 1);
    assert_eq!(resp.status().unwrap(), StatusCode::Ok);
    assert_eq!(resp.payload(), b"pong");
}

#[tokio::test]
async fn test_messages_preserve_order() {
    let (listener, endpoint) = ephemeral_listener().await;

    let dial_handle = tokio::spawn({
        let endpoint = endpoint.clone();
        async move { Connection::connect(&endpoint).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut server_conn = Connection::new(stream);
    let client_conn = dial_handle.await.unwrap();

    for i in 1u32..=5 {
        let msg = Message::request(i, Command::Ping, Vec::new()).unwrap();
        client_conn.send(msg).await.unwrap();
    }

    for i in 1u32..=5 {
        let msg =
            tokio::time::timeout(Duration::from_secs(5), recv_skip_heartbeat(&mut server_conn))
                .await
                .expect("timeout")
                .expect("recv returned None");
        assert_eq!(msg.sequence(), i);
    }
}

#[tokio::test]
async fn test_large_payload_transfer() {
    let (listener, endpoint) = ephemeral_listener().await;

    let dial_handle = tokio::spawn({
        let endpoint = endpoint.clone();
        async move { Connection::connect(&endpoint).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut server_conn = Connection::new(stream);
    let client_conn = dial_handle.await.unwrap();

    // 200 KiB, under the 256 KiB limit
    let large = vec![0xABu8; 200 * 1024];
    let msg = Message::request(1, Command::DeviceInfo, large.clone()).unwrap();
    client_conn.send(msg).await.unwrap();

    let received =
        tokio::time::timeout(Duration::from_secs(10), recv_skip_heartbeat(&mut server_conn))
            .await
            .expect("timeout")
            .expect("recv returned None");
    assert_eq!(received.payload().len(), large.len());
    assert_eq!(received.payload(), &large[..]);
}

#[tokio::test]
async fn test_connection_drop_detected() {
    let (listener, endpoint) = ephemeral_listener().await;

    let dial_handle = tokio::spawn({
        let endpoint = endpoint.clone();
        async move { Connection::connect(&endpoint).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut server_conn = Connection::new(stream);
    let client_conn = dial_handle.await.unwrap();

    drop(client_conn);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = tokio::time::timeout(Duration::from_secs(5), server_conn.recv())
        .await
        .expect("timeout");
    // After the peer drops, recv eventually returns None; a heartbeat
    // from our own writer may still be buffered.
    if let Some(msg) = result {
        assert!(msg.is_heartbeat());
    }
}

// ── Manager round-trips ──────────────────────────────────────────

#[tokio::test]
async fn test_manager_request_response() {
    let (agent, _agent_events) = CommunicationManager::new(test_config("agent-01"));
    agent
        .router()
        .register(ServiceId::Device, Arc::new(TestDeviceHandler));
    let agent_addr = agent.listen("127.0.0.1:0").await.unwrap();

    let (center, mut center_events) = CommunicationManager::new(test_config("center-01"));
    seed_registry(center.registry(), "scanner-1", agent_addr);

    center.connect("scanner-1").await.unwrap();
    assert_eq!(
        next_event(&mut center_events).await,
        LinkEvent::PeerConnected {
            peer: "scanner-1".into()
        }
    );
    assert!(center.is_peer_connected("scanner-1"));

    // Ping is served by the built-in System handler
    let response = center
        .request("scanner-1", Command::Ping, Vec::new())
        .await
        .unwrap();
    assert_eq!(response.status().unwrap(), StatusCode::Ok);
    assert!(response.payload().is_empty());

    // DeviceInfo round-trip
    let response = center
        .request("scanner-1", Command::DeviceInfo, Vec::new())
        .await
        .unwrap();
    assert_eq!(response.status().unwrap(), StatusCode::Ok);
    let info = DeviceInfo::from_bytes(response.payload()).unwrap();
    assert_eq!(info.model, "LNX-2300");
    assert_eq!(info.serial, "A73-00142");

    // DeviceState round-trip
    let response = center
        .request("scanner-1", Command::DeviceState, Vec::new())
        .await
        .unwrap();
    let status = DeviceStatus::from_bytes(response.payload()).unwrap();
    assert_eq!(status.state, DeviceState::Idle);
}

#[tokio::test]
async fn test_manager_unknown_service_status() {
    let (agent, _agent_events) = CommunicationManager::new(test_config("agent-01"));
    agent
        .router()
        .register(ServiceId::Device, Arc::new(TestDeviceHandler));
    let agent_addr = agent.listen("127.0.0.1:0").await.unwrap();

    let (center, _center_events) = CommunicationManager::new(test_config("center-01"));
    seed_registry(center.registry(), "scanner-1", agent_addr);
    center.connect("scanner-1").await.unwrap();

    // The agent serves no Registry handler.
    let response = center
        .request("scanner-1", Command::ListServices, Vec::new())
        .await
        .unwrap();
    assert_eq!(response.status().unwrap(), StatusCode::UnknownService);
}

#[tokio::test]
async fn test_manager_broadcast_reaches_peer() {
    let (agent, _agent_events) = CommunicationManager::new(test_config("agent-01"));
    let mut notifications = agent.router().subscribe_notifications();
    let agent_addr = agent.listen("127.0.0.1:0").await.unwrap();

    let (center, mut center_events) = CommunicationManager::new(test_config("center-01"));
    seed_registry(center.registry(), "scanner-1", agent_addr);
    center.connect("scanner-1").await.unwrap();
    next_event(&mut center_events).await; // PeerConnected

    let delivered = center
        .broadcast(Command::ServiceOffline, b"maintenance".to_vec())
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let notify = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timeout")
        .expect("notification");
    assert_eq!(notify.command().unwrap(), Command::ServiceOffline);
    assert_eq!(notify.payload(), b"maintenance");
    assert!(notify
        .flags()
        .contains(devlink_core::FrameFlags::BROADCAST));
}

#[tokio::test]
async fn test_manager_graceful_disconnect() {
    let (agent, mut agent_events) = CommunicationManager::new(test_config("agent-01"));
    let agent_addr = agent.listen("127.0.0.1:0").await.unwrap();

    let (center, mut center_events) = CommunicationManager::new(test_config("center-01"));
    seed_registry(center.registry(), "scanner-1", agent_addr);
    center.connect("scanner-1").await.unwrap();
    next_event(&mut center_events).await; // PeerConnected

    // Agent observes the center arriving under its node id.
    assert_eq!(
        next_event(&mut agent_events).await,
        LinkEvent::PeerConnected {
            peer: "center-01".into()
        }
    );

    center.disconnect("scanner-1").await.unwrap();
    assert!(!center.is_peer_connected("scanner-1"));

    // The agent sees Bye and drops the peer without reconnecting.
    assert_eq!(
        next_event(&mut agent_events).await,
        LinkEvent::PeerDisconnected {
            peer: "center-01".into()
        }
    );
}

#[tokio::test]
async fn test_manager_request_timeout() {
    struct StallingHandler;

    #[async_trait]
    impl ServiceHandler for StallingHandler {
        async fn handle(&self, _request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok((StatusCode::Ok, Vec::new()))
        }
    }

    let (agent, _agent_events) = CommunicationManager::new(test_config("agent-01"));
    agent
        .router()
        .register(ServiceId::Device, Arc::new(StallingHandler));
    let agent_addr = agent.listen("127.0.0.1:0").await.unwrap();

    let mut config = test_config("center-01");
    config.request_timeout = Duration::from_millis(300);
    let (center, _center_events) = CommunicationManager::new(config);
    seed_registry(center.registry(), "scanner-1", agent_addr);
    center.connect("scanner-1").await.unwrap();

    let err = center
        .request("scanner-1", Command::DeviceInfo, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Timeout(_)));
}

// ── Reconnect ────────────────────────────────────────────────────

#[tokio::test]
async fn test_manager_reconnects_dropped_peer() {
    // A bare-bones service that accepts twice: the first connection is
    // dropped right after the handshake (no Bye), the second is held
    // open. The manager must redial on its own.
    let (listener, endpoint) = ephemeral_listener().await;
    let addr: SocketAddr = endpoint.to_socket_string().parse().unwrap();

    tokio::spawn(async move {
        for round in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);

            let request = recv_skip_heartbeat(&mut conn).await.unwrap();
            assert_eq!(request.command().unwrap(), Command::Hello);
            let reply = Hello::new("fake-agent", vec!["scanner-1".into()]);
            let response = Message::response(
                request.sequence(),
                Command::Hello,
                StatusCode::Ok,
                reply.to_bytes().unwrap(),
            )
            .unwrap();
            conn.send(response).await.unwrap();

            if round == 0 {
                // Abrupt close: no Bye.
                drop(conn);
            } else {
                // Stay up long enough for the test to finish.
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }
    });

    let (center, mut center_events) = CommunicationManager::new(test_config("center-01"));
    seed_registry(center.registry(), "scanner-1", addr);
    center.connect("scanner-1").await.unwrap();

    assert_eq!(
        next_event(&mut center_events).await,
        LinkEvent::PeerConnected {
            peer: "scanner-1".into()
        }
    );
    // The drop is noticed...
    assert_eq!(
        next_event(&mut center_events).await,
        LinkEvent::PeerDisconnected {
            peer: "scanner-1".into()
        }
    );
    // ...and the manager reconnects by itself.
    assert_eq!(
        next_event(&mut center_events).await,
        LinkEvent::PeerConnected {
            peer: "scanner-1".into()
        }
    );
    assert!(center.is_peer_connected("scanner-1"));
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn test_announcer_feeds_watcher() {
    // Probe an ephemeral UDP port for the watcher.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let registry = Arc::new(ServiceRegistry::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let watcher_handle = Watcher::new(port)
        .ignoring_node("center-01")
        .spawn(registry.clone(), events_tx);

    // Unicast target instead of broadcast so the test stays on
    // loopback.
    let announcer_handle = Announcer::new(Announcement::new(
        "scanner-1",
        "agent-01",
        9400,
        "LNX-2300",
    ))
    .with_target(SocketAddr::from(([127, 0, 0, 1], port)))
    .with_interval(Duration::from_millis(50))
    .spawn();

    let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("timeout")
        .expect("event");
    match event {
        devlink_core::DiscoveryEvent::ServiceUp { service, endpoint } => {
            assert_eq!(service, "scanner-1");
            assert_eq!(endpoint.port(), 9400);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let entry = registry.get("scanner-1").expect("registered");
    assert_eq!(entry.announcement.model, "LNX-2300");

    announcer_handle.abort();
    watcher_handle.abort();
}
