use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        State,
    },
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, warn};

use super::hub::{CloseReason, CollaborationHub, HubSession};
use crate::auth::session::{SessionAuthenticator, SessionRequest};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    HubError,
};
use crate::metrics;

/// Server-side liveness probing.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Clone)]
struct HubRouterState {
    hub: CollaborationHub,
    authenticator: Arc<dyn SessionAuthenticator>,
    heartbeat: Heartbeat,
}

pub fn router(
    hub: CollaborationHub,
    authenticator: Arc<dyn SessionAuthenticator>,
    heartbeat: Heartbeat,
) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(HubRouterState { hub, authenticator, heartbeat })
}

/// The session is checked before the upgrade extractor's result, so a
/// request without a valid session gets 401 whether or not it is a well
/// formed upgrade.
async fn ws_upgrade(
    State(state): State<HubRouterState>,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = SessionRequest::new(&headers, uri.query());
    let Some(identity) = state.hub.admit(state.authenticator.as_ref(), &request).await else {
        metrics::increment_rejected_upgrades();
        warn!(path = %uri.path(), "websocket upgrade rejected: no valid session");
        return HubError::from_code(ErrorCode::AuthInvalidToken).into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    let heartbeat = state.heartbeat;
    let request_id =
        current_request_id().unwrap_or_else(|| request_id_from_headers_or_generate(&headers));
    ws.on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, async move {
            match hub.connect(identity).await {
                Ok(session) => run_connection(socket, session, hub.shutdown_signal(), heartbeat).await,
                Err(error) => warn!(error = %error, "failed to register connection"),
            }
        })
        .await;
    })
}

async fn run_connection(
    mut socket: WebSocket,
    mut session: HubSession,
    mut shutdown: watch::Receiver<bool>,
    heartbeat: Heartbeat,
) {
    let evicted = Arc::clone(&session.outbound().evicted);

    let mut ping_interval = tokio::time::interval(heartbeat.interval);
    ping_interval.reset(); // skip immediate first tick
    let mut pong_deadline: Option<Instant> = None;

    let reason = if *shutdown.borrow_and_update() {
        CloseReason::ServerShutdown
    } else {
        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break CloseReason::TransportError;
                    }
                    pong_deadline.get_or_insert_with(|| Instant::now() + heartbeat.timeout);
                }
                _ = wait_until(pong_deadline) => {
                    warn!(connection_id = %session.connection_id(), "heartbeat timeout, disconnecting");
                    break CloseReason::HeartbeatTimeout;
                }
                _ = evicted.notified() => {
                    break CloseReason::SlowConsumer;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break CloseReason::ServerShutdown;
                    }
                }
                outbound = session.outbound().frames.recv() => {
                    let Some(frame) = outbound else {
                        break CloseReason::TransportError;
                    };
                    if socket.send(Message::Text((&*frame).into())).await.is_err() {
                        break CloseReason::TransportError;
                    }
                }
                inbound = socket.recv() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            session.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            session.handle_binary(&bytes).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            pong_deadline = None;
                        }
                        Some(Ok(Message::Ping(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                        Some(Err(error)) => {
                            debug!(connection_id = %session.connection_id(), error = %error, "websocket read failed");
                            break CloseReason::TransportError;
                        }
                    }
                }
            }
        }
    };

    if let Some(frame) = close_frame(reason) {
        let _ = socket.send(Message::Close(Some(frame))).await;
    }
    session.close(reason).await;
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn close_frame(reason: CloseReason) -> Option<CloseFrame> {
    let (code, text) = match reason {
        CloseReason::ClientClosed | CloseReason::TransportError => return None,
        CloseReason::HeartbeatTimeout => (close_code::POLICY, "heartbeat timeout"),
        CloseReason::SlowConsumer => (close_code::AGAIN, "outbound buffer overflow"),
        CloseReason::ServerShutdown => (close_code::AWAY, "server shutting down"),
    };
    Some(CloseFrame { code, reason: text.into() })
}
