// Connection lifecycle: Connecting -> Authenticated -> Closed.
//
// `CollaborationHub::admit` settles Connecting before a `HubSession` exists.
// A session is therefore born Authenticated and only ever moves to Closed.

use std::{fmt, sync::Arc};

use intelhub_common::{
    protocol::ws::{
        decode_client_bytes, decode_client_message, message_type, ClientMessage, ConnectedMessage,
        Envelope,
    },
    types::ConnectionId,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::presence::{presence_notice, RoomMembershipPolicy};
use super::registry::{ConnectionRegistry, OutboundHandle, OutboundReceiver};
use super::router::{encode_frame, FanOut, MessageRouter, RouteError};
use crate::auth::session::{SessionAuthenticator, SessionIdentity, SessionRequest};
use crate::metrics;

/// State of an admitted connection. Connecting is the upgrade request
/// before `admit` returns and never has a `HubSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Authenticated,
    Closed,
}

/// Why a connection reached Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    SlowConsumer,
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::ServerShutdown => "server_shutdown",
        })
    }
}

#[derive(Clone)]
pub struct CollaborationHub {
    registry: ConnectionRegistry,
    router: MessageRouter,
    shutdown: Arc<watch::Sender<bool>>,
    outbound_buffer: usize,
}

impl CollaborationHub {
    pub fn new(outbound_buffer: usize) -> Self {
        let registry = ConnectionRegistry::default();
        let router = MessageRouter::new(registry.clone());
        Self::from_parts(registry, router, outbound_buffer)
    }

    pub fn with_membership_policy(
        outbound_buffer: usize,
        membership: Arc<dyn RoomMembershipPolicy>,
    ) -> Self {
        let registry = ConnectionRegistry::default();
        let router = MessageRouter::with_membership_policy(registry.clone(), membership);
        Self::from_parts(registry, router, outbound_buffer)
    }

    fn from_parts(registry: ConnectionRegistry, router: MessageRouter, outbound_buffer: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { registry, router, shutdown: Arc::new(shutdown), outbound_buffer: outbound_buffer.max(1) }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Resolve the Connecting side of an upgrade. Nothing touches the
    /// registry here, so a rejected request leaves no trace.
    pub async fn admit(
        &self,
        authenticator: &dyn SessionAuthenticator,
        request: &SessionRequest<'_>,
    ) -> Option<SessionIdentity> {
        let identity = authenticator.resolve_session(request).await;
        debug!(authenticated = identity.is_some(), "upgrade admission");
        identity
    }

    /// Enter Authenticated: register, greet privately, announce to peers.
    pub async fn connect(&self, identity: SessionIdentity) -> Result<HubSession, RouteError> {
        let (outbound, receiver) = OutboundHandle::channel(self.outbound_buffer);
        let connection_id = self
            .registry
            .register_with_greeting(
                outbound,
                identity.user_id,
                identity.username.clone(),
                |connection_id, active_users| {
                    encode_frame(&ConnectedMessage {
                        client_id: connection_id.clone(),
                        active_users,
                    })
                },
            )
            .await?;
        metrics::connection_opened();

        let session = HubSession {
            connection_id,
            identity,
            state: ConnectionState::Authenticated,
            outbound: receiver,
            registry: self.registry.clone(),
            router: self.router.clone(),
        };

        let announce = Envelope::new(
            message_type::USER_ACTIVE,
            serde_json::to_value(presence_notice(&session.identity.username)).ok(),
            session.connection_id.clone(),
        );
        self.router.broadcast(&announce).await?;

        info!(
            connection_id = %session.connection_id,
            user_id = session.identity.user_id,
            username = %session.identity.username,
            "connection authenticated"
        );
        Ok(session)
    }

    /// Ask every connection task to close. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// One Authenticated connection as seen by its own task.
pub struct HubSession {
    connection_id: ConnectionId,
    identity: SessionIdentity,
    state: ConnectionState,
    outbound: OutboundReceiver,
    registry: ConnectionRegistry,
    router: MessageRouter,
}

impl HubSession {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn outbound(&mut self) -> &mut OutboundReceiver {
        &mut self.outbound
    }

    /// Route one inbound text frame. Malformed frames are logged and dropped;
    /// `None` means nothing was sent.
    pub async fn handle_text(&self, raw: &str) -> Option<FanOut> {
        if self.state != ConnectionState::Authenticated {
            return None;
        }
        match decode_client_message(raw) {
            Ok(message) => self.route(message).await,
            Err(error) => {
                self.reject(&RouteError::from(error));
                None
            }
        }
    }

    pub async fn handle_binary(&self, raw: &[u8]) -> Option<FanOut> {
        if self.state != ConnectionState::Authenticated {
            return None;
        }
        match decode_client_bytes(raw) {
            Ok(message) => self.route(message).await,
            Err(error) => {
                self.reject(&RouteError::from(error));
                None
            }
        }
    }

    async fn route(&self, message: ClientMessage) -> Option<FanOut> {
        match self.router.dispatch(&self.connection_id, message).await {
            Ok(fan_out) => Some(fan_out),
            Err(error) => {
                self.reject(&error);
                None
            }
        }
    }

    fn reject(&self, error: &RouteError) {
        metrics::increment_malformed_messages();
        warn!(
            connection_id = %self.connection_id,
            username = %self.identity.username,
            error = %error,
            "dropping malformed message"
        );
    }

    /// Enter Closed: deregister and announce departure. Only the first call
    /// has any effect.
    pub async fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.outbound.frames.close();

        let Some(departed) = self.registry.deregister(&self.connection_id).await else {
            return;
        };
        metrics::connection_closed();

        match reason {
            CloseReason::ClientClosed | CloseReason::ServerShutdown => info!(
                connection_id = %self.connection_id,
                username = %departed.username,
                reason = %reason,
                "connection closed"
            ),
            CloseReason::TransportError | CloseReason::HeartbeatTimeout => info!(
                connection_id = %self.connection_id,
                username = %departed.username,
                reason = %reason,
                "connection lost"
            ),
            CloseReason::SlowConsumer => {
                metrics::increment_evictions();
                warn!(
                    connection_id = %self.connection_id,
                    username = %departed.username,
                    "connection evicted as slow consumer"
                )
            }
        }

        announce_departure(&self.router, &self.connection_id, &departed.username).await;
    }
}

impl Drop for HubSession {
    // A task that unwinds without calling `close` must not leak its entry.
    fn drop(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.registry.clone();
        let router = self.router.clone();
        let connection_id = self.connection_id.clone();
        runtime.spawn(async move {
            if let Some(departed) = registry.deregister(&connection_id).await {
                metrics::connection_closed();
                warn!(connection_id = %connection_id, "connection dropped without close");
                announce_departure(&router, &connection_id, &departed.username).await;
            }
        });
    }
}

async fn announce_departure(router: &MessageRouter, connection_id: &ConnectionId, username: &str) {
    let envelope = Envelope::new(
        message_type::USER_INACTIVE,
        serde_json::to_value(presence_notice(username)).ok(),
        connection_id.clone(),
    );
    if let Err(error) = router.broadcast(&envelope).await {
        warn!(connection_id = %connection_id, error = %error, "failed to announce departure");
    }
}
