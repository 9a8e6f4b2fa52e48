//! Inbound message routing.
//!
//! Requests are dispatched to the [`ServiceHandler`] registered for
//! their service id; notifications fan out to subscribers. Every
//! request produces a response — failures become error status codes,
//! never dropped frames.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::message::{Message, ServiceId, StatusCode};

/// Capacity of the notification fan-out channel.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

// ── ServiceHandler ───────────────────────────────────────────────

/// One service's request handler.
///
/// Implementations return the response status plus payload bytes; the
/// router wraps them into a response echoing the request's sequence
/// and command. Returning `Err` maps onto an error status code.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError>;
}

// ── MessageRouter ────────────────────────────────────────────────

/// Routes inbound traffic to service handlers and notify subscribers.
pub struct MessageRouter {
    handlers: RwLock<HashMap<ServiceId, Arc<dyn ServiceHandler>>>,
    notify_tx: broadcast::Sender<Message>,
}

impl MessageRouter {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            notify_tx,
        }
    }

    /// Register (or replace) the handler for a service.
    pub fn register(&self, service: ServiceId, handler: Arc<dyn ServiceHandler>) {
        self.handlers
            .write()
            .expect("router lock poisoned")
            .insert(service, handler);
    }

    /// Whether a handler is registered for `service`.
    pub fn has_handler(&self, service: ServiceId) -> bool {
        self.handlers
            .read()
            .expect("router lock poisoned")
            .contains_key(&service)
    }

    /// Subscribe to inbound notifications.
    ///
    /// Slow subscribers may observe `Lagged` and miss notifications;
    /// this channel is for monitoring, not reliable delivery.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Message> {
        self.notify_tx.subscribe()
    }

    /// Dispatch an inbound request, always producing a response.
    pub async fn dispatch_request(&self, request: &Message) -> Result<Message, LinkError> {
        let service = match request.service() {
            Ok(s) => s,
            Err(e) => {
                debug!("request with unknown service: {e}");
                return Ok(Message::status_response_for(
                    request,
                    StatusCode::UnknownService,
                ));
            }
        };
        let command = match request.command() {
            Ok(c) => c,
            Err(e) => {
                debug!("request with unknown command: {e}");
                return Ok(Message::status_response_for(
                    request,
                    StatusCode::UnknownCommand,
                ));
            }
        };

        let handler = self
            .handlers
            .read()
            .expect("router lock poisoned")
            .get(&service)
            .cloned();

        match handler {
            None => {
                debug!(%service, %command, "no handler registered");
                Message::response(
                    request.sequence(),
                    command,
                    StatusCode::UnknownService,
                    Vec::new(),
                )
            }
            Some(handler) => match handler.handle(request).await {
                Ok((status, payload)) => {
                    Message::response(request.sequence(), command, status, payload)
                }
                Err(e) => {
                    warn!(%service, %command, "handler failed: {e}");
                    Message::response(
                        request.sequence(),
                        command,
                        status_for_error(&e),
                        Vec::new(),
                    )
                }
            },
        }
    }

    /// Fan an inbound notification out to subscribers.
    pub fn dispatch_notify(&self, message: Message) {
        // No subscribers is fine — send only fails when empty.
        let _ = self.notify_tx.send(message);
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a handler error onto the status code the peer sees.
fn status_for_error(e: &LinkError) -> StatusCode {
    match e {
        LinkError::Encoding(_) => StatusCode::BadPayload,
        LinkError::UnknownVariant { .. } => StatusCode::UnknownCommand,
        LinkError::ProtocolViolation(_) => StatusCode::Unsupported,
        _ => StatusCode::Internal,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    struct EchoHandler;

    #[async_trait]
    impl ServiceHandler for EchoHandler {
        async fn handle(&self, request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
            Ok((StatusCode::Ok, request.payload().to_vec()))
        }
    }

    struct FailingHandler(LinkError);

    #[async_trait]
    impl ServiceHandler for FailingHandler {
        async fn handle(&self, _request: &Message) -> Result<(StatusCode, Vec<u8>), LinkError> {
            Err(match &self.0 {
                LinkError::Encoding(s) => LinkError::Encoding(s.clone()),
                _ => LinkError::Other("boom".into()),
            })
        }
    }

    #[tokio::test]
    async fn dispatch_to_registered_handler() {
        let router = MessageRouter::new();
        router.register(ServiceId::Device, Arc::new(EchoHandler));

        let request = Message::request(9, Command::DeviceInfo, b"ping".to_vec()).unwrap();
        let response = router.dispatch_request(&request).await.unwrap();

        assert_eq!(response.sequence(), 9);
        assert_eq!(response.command().unwrap(), Command::DeviceInfo);
        assert_eq!(response.status().unwrap(), StatusCode::Ok);
        assert_eq!(response.payload(), b"ping");
    }

    #[tokio::test]
    async fn unknown_service_gets_error_status() {
        let router = MessageRouter::new();
        let request = Message::request(1, Command::DeviceInfo, Vec::new()).unwrap();
        let response = router.dispatch_request(&request).await.unwrap();
        assert_eq!(response.status().unwrap(), StatusCode::UnknownService);
        assert_eq!(response.sequence(), 1);
    }

    #[tokio::test]
    async fn unknown_raw_command_is_answered() {
        let router = MessageRouter::new();
        // Hand-craft a request whose command discriminant is garbage.
        let header = crate::frame::FrameHeader::new(0x1, 0, 0x0001, 0x7777, 0, 5, 0);
        let request = Message::from_bytes(&header.to_bytes()).unwrap();

        let response = router.dispatch_request(&request).await.unwrap();
        assert_eq!(response.status().unwrap(), StatusCode::UnknownCommand);
        assert_eq!(response.sequence(), 5);
        assert_eq!(response.header().command_raw(), 0x7777);
    }

    #[tokio::test]
    async fn handler_encoding_error_maps_to_bad_payload() {
        let router = MessageRouter::new();
        router.register(
            ServiceId::Device,
            Arc::new(FailingHandler(LinkError::Encoding("bad".into()))),
        );

        let request = Message::request(2, Command::DeviceState, Vec::new()).unwrap();
        let response = router.dispatch_request(&request).await.unwrap();
        assert_eq!(response.status().unwrap(), StatusCode::BadPayload);
    }

    #[tokio::test]
    async fn handler_generic_error_maps_to_internal() {
        let router = MessageRouter::new();
        router.register(
            ServiceId::Device,
            Arc::new(FailingHandler(LinkError::Other("boom".into()))),
        );

        let request = Message::request(3, Command::DeviceInfo, Vec::new()).unwrap();
        let response = router.dispatch_request(&request).await.unwrap();
        assert_eq!(response.status().unwrap(), StatusCode::Internal);
    }

    #[tokio::test]
    async fn replacing_a_handler_takes_effect() {
        let router = MessageRouter::new();
        router.register(
            ServiceId::Device,
            Arc::new(FailingHandler(LinkError::Other("boom".into()))),
        );
        router.register(ServiceId::Device, Arc::new(EchoHandler));

        let request = Message::request(4, Command::DeviceInfo, b"x".to_vec()).unwrap();
        let response = router.dispatch_request(&request).await.unwrap();
        assert_eq!(response.status().unwrap(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn notifications_fan_out() {
        let router = MessageRouter::new();
        let mut sub_a = router.subscribe_notifications();
        let mut sub_b = router.subscribe_notifications();

        let notify = Message::notify(5, Command::StateChanged, b"fault".to_vec()).unwrap();
        router.dispatch_notify(notify);

        assert_eq!(sub_a.recv().await.unwrap().payload(), b"fault");
        assert_eq!(sub_b.recv().await.unwrap().payload(), b"fault");
    }

    #[test]
    fn has_handler_reports_registration() {
        let router = MessageRouter::new();
        assert!(!router.has_handler(ServiceId::Device));
        router.register(ServiceId::Device, Arc::new(EchoHandler));
        assert!(router.has_handler(ServiceId::Device));
    }
}
