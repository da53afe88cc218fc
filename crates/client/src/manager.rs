// Hub connection manager.
//
// One actor task owns the transport, the reconnect timer and the outbound
// queue. `HubClient` handles are cheap clones that feed it commands; the
// application consumes `ClientEvent`s from the receiver returned by
// `spawn`.

use std::sync::Arc;

use intelhub_common::protocol::ws::{ClientMessage, Envelope, ServerMessage};
use intelhub_common::types::ConnectionId;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::debounce::TypingNotifier;
use crate::queue::OutboundQueue;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, Link, WebSocketConnector};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { client_id: ConnectionId, active_users: Vec<String> },
    Message(Envelope),
    Disconnected { reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("hub client has been shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct HubClient {
    commands: mpsc::UnboundedSender<ClientMessage>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ConnectionState>,
    typing_debounce: std::time::Duration,
}

impl HubClient {
    /// Start the connection manager on the current runtime.
    pub fn spawn<C: Connector>(
        config: ClientConfig,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let manager = ConnectionManager {
            connector,
            policy: ReconnectPolicy::fixed(config.reconnect_delay),
            queue: OutboundQueue::new(config.queue_capacity),
            commands: commands_rx,
            events: events_tx,
            shutdown: shutdown_rx,
            state: state_tx,
            own_id: None,
        };
        tokio::spawn(manager.run());

        let client = Self {
            commands,
            shutdown: Arc::new(shutdown),
            state,
            typing_debounce: config.typing_debounce,
        };
        (client, events)
    }

    /// Convenience for the production transport.
    pub fn connect(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let connector = WebSocketConnector::from_config(&config);
        Self::spawn(config, connector)
    }

    /// Send now if connected, otherwise queue. Typing signals are dropped
    /// while disconnected.
    pub fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.commands.send(message).map_err(|_| ClientError::Closed)
    }

    pub fn typing(&self) -> TypingNotifier {
        TypingNotifier::spawn(self.clone(), self.typing_debounce)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Cancel the reconnect timer and close the transport.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

enum Exit {
    Lost(String),
    Shutdown,
}

struct ConnectionManager<C> {
    connector: C,
    policy: ReconnectPolicy,
    queue: OutboundQueue,
    commands: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<ClientEvent>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    own_id: Option<ConnectionId>,
}

impl<C: Connector> ConnectionManager<C> {
    async fn run(mut self) {
        let mut attempt = 0u32;
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok(link) => {
                    attempt = 0;
                    match self.drive(link).await {
                        Exit::Shutdown => break,
                        Exit::Lost(reason) => {
                            info!(reason = %reason, queued = self.queue.len(), "hub connection lost");
                            self.emit(ClientEvent::Disconnected { reason });
                        }
                    }
                }
                Err(error) => warn!(error = %error, attempt, "hub connection attempt failed"),
            }

            self.own_id = None;
            self.state.send_replace(ConnectionState::Disconnected);
            attempt = attempt.saturating_add(1);
            let Some(delay) = self.policy.delay_for(attempt) else {
                warn!(attempt, "reconnect attempts exhausted");
                break;
            };
            if !self.idle(delay).await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!(dropped = self.queue.dropped(), pending = self.queue.len(), "hub client stopped");
    }

    /// Wait out the reconnect delay, queueing anything sent meanwhile.
    /// Returns false on shutdown.
    async fn idle(&mut self, delay: std::time::Duration) -> bool {
        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return true,
                _ = self.shutdown.changed() => return false,
                command = self.commands.recv() => match command {
                    Some(message) => self.enqueue(message),
                    None => return false,
                },
            }
        }
    }

    async fn drive(&mut self, mut link: Link) -> Exit {
        self.state.send_replace(ConnectionState::Connected);

        while let Some(message) = self.queue.pop_front() {
            if link.outbound.send(message.clone()).await.is_err() {
                self.queue.push_front(message);
                return Exit::Lost("transport closed while flushing queue".to_owned());
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                command = self.commands.recv() => {
                    let Some(message) = command else {
                        return Exit::Shutdown;
                    };
                    if link.outbound.send(message.clone()).await.is_err() {
                        self.enqueue(message);
                        return Exit::Lost("transport closed".to_owned());
                    }
                }
                inbound = link.inbound.recv() => match inbound {
                    Some(message) => self.handle_inbound(message),
                    None => return Exit::Lost("connection closed".to_owned()),
                },
            }
        }
    }

    fn handle_inbound(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected(frame) => {
                info!(client_id = %frame.client_id, active_users = frame.active_users.len(), "connected to hub");
                self.own_id = Some(frame.client_id.clone());
                self.emit(ClientEvent::Connected {
                    client_id: frame.client_id,
                    active_users: frame.active_users,
                });
            }
            ServerMessage::Envelope(envelope) => {
                if self.own_id.as_ref().is_some_and(|id| envelope.is_from(id)) {
                    return;
                }
                self.emit(ClientEvent::Message(envelope));
            }
        }
    }

    fn enqueue(&mut self, message: ClientMessage) {
        if message.is_typing_signal() {
            debug!(message_type = %message.kind, "dropping typing signal while disconnected");
            return;
        }
        if let Some(evicted) = self.queue.push(message) {
            warn!(message_type = %evicted.kind, "outbound queue full; dropped oldest message");
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("client event receiver dropped");
        }
    }
}
