use std::{collections::HashMap, sync::Arc};

use intelhub_common::types::ConnectionId;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify, RwLock,
};
use tracing::debug;

use super::presence::{TypingState, TypingUser};

/// One encoded server frame, shared by every recipient of a fan-out.
pub type Frame = Arc<str>;

/// Write side of a connection's bounded outbound buffer.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    sender: mpsc::Sender<Frame>,
    evicted: Arc<Notify>,
}

/// Read side, owned by the connection task that drains it to the socket.
#[derive(Debug)]
pub struct OutboundReceiver {
    pub frames: mpsc::Receiver<Frame>,
    pub evicted: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The transport is gone. Expected when a close races a broadcast.
    Closed,
    /// The peer is not draining; the frame was dropped and the peer told to go.
    Full,
}

impl OutboundHandle {
    pub fn channel(capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, frames) = mpsc::channel(capacity.max(1));
        let evicted = Arc::new(Notify::new());
        (Self { sender, evicted: Arc::clone(&evicted) }, OutboundReceiver { frames, evicted })
    }

    /// Never waits.
    pub fn deliver(&self, frame: &Frame) -> Delivery {
        match self.sender.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
            Err(TrySendError::Full(_)) => {
                self.evicted.notify_one();
                Delivery::Full
            }
        }
    }
}

#[derive(Debug)]
struct ConnectionRecord {
    user_id: i64,
    username: String,
    typing: Option<TypingState>,
    joined_seq: u64,
    outbound: OutboundHandle,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    next_seq: u64,
}

impl RegistryState {
    fn insert(&mut self, outbound: OutboundHandle, user_id: i64, username: String) -> ConnectionId {
        let mut connection_id = ConnectionId::generate();
        while self.connections.contains_key(&connection_id) {
            connection_id = ConnectionId::generate();
        }

        let joined_seq = self.next_seq;
        self.next_seq += 1;
        self.connections.insert(
            connection_id.clone(),
            ConnectionRecord { user_id, username, typing: None, joined_seq, outbound },
        );
        connection_id
    }

    fn roster(&self) -> Vec<String> {
        let mut records: Vec<&ConnectionRecord> = self.connections.values().collect();
        records.sort_by_key(|record| record.joined_seq);
        records.into_iter().map(|record| record.username.clone()).collect()
    }
}

/// Who left, as returned by the deregister call that actually removed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub user_id: i64,
    pub username: String,
}

/// Result of replacing a connection's typing state.
#[derive(Debug, Clone)]
pub struct TypingUpdate {
    pub username: String,
    pub previous: Option<TypingState>,
}

/// A recipient chosen for one fan-out pass.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub connection_id: ConnectionId,
    pub outbound: OutboundHandle,
}

/// Process-wide table of live connections.
///
/// All mutation goes through the write lock. Fan-out takes one read-locked
/// snapshot of recipients and sends after releasing it, so a slow send can
/// never hold up `register`/`deregister`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub async fn register(
        &self,
        outbound: OutboundHandle,
        user_id: i64,
        username: impl Into<String>,
    ) -> ConnectionId {
        let mut state = self.state.write().await;
        state.insert(outbound, user_id, username.into())
    }

    /// Register and queue the connection's first frame while still holding
    /// the write lock, so no broadcast can land ahead of it. `greeting` gets
    /// the new id and the roster in join order, self included.
    pub async fn register_with_greeting<F, E>(
        &self,
        outbound: OutboundHandle,
        user_id: i64,
        username: impl Into<String>,
        greeting: F,
    ) -> Result<ConnectionId, E>
    where
        F: FnOnce(&ConnectionId, Vec<String>) -> Result<Frame, E>,
    {
        let mut state = self.state.write().await;
        let connection_id = state.insert(outbound.clone(), user_id, username.into());

        match greeting(&connection_id, state.roster()) {
            Ok(frame) => {
                if outbound.deliver(&frame) != Delivery::Queued {
                    debug!(connection_id = %connection_id, "greeting not queued");
                }
                Ok(connection_id)
            }
            Err(error) => {
                state.connections.remove(&connection_id);
                Err(error)
            }
        }
    }

    /// Returns the departed identity only on the call that removed the entry.
    pub async fn deregister(&self, connection_id: &ConnectionId) -> Option<Departed> {
        let removed = self.state.write().await.connections.remove(connection_id);
        removed.map(|record| Departed { user_id: record.user_id, username: record.username })
    }

    pub async fn set_typing(
        &self,
        connection_id: &ConnectionId,
        typing: Option<TypingState>,
    ) -> Option<TypingUpdate> {
        let mut state = self.state.write().await;
        let record = state.connections.get_mut(connection_id)?;
        let previous = std::mem::replace(&mut record.typing, typing);
        Some(TypingUpdate { username: record.username.clone(), previous })
    }

    /// Usernames in join order. One entry per connection, so a user with two
    /// tabs open appears twice.
    pub async fn snapshot(&self) -> Vec<String> {
        self.state.read().await.roster()
    }

    pub async fn typing_users(&self) -> Vec<TypingUser> {
        let state = self.state.read().await;
        let mut records: Vec<&ConnectionRecord> =
            state.connections.values().filter(|record| record.typing.is_some()).collect();
        records.sort_by_key(|record| record.joined_seq);
        records
            .into_iter()
            .filter_map(|record| {
                record.typing.as_ref().map(|typing| TypingUser {
                    username: record.username.clone(),
                    kind: typing.kind,
                    context_id: typing.context_id.clone(),
                })
            })
            .collect()
    }

    pub async fn typing_state(&self, connection_id: &ConnectionId) -> Option<TypingState> {
        self.state.read().await.connections.get(connection_id)?.typing.clone()
    }

    pub async fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(connection_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Single-recipient send. Unknown ids behave like a closed transport.
    pub async fn send_to(&self, connection_id: &ConnectionId, frame: &Frame) -> Delivery {
        let outbound = {
            let state = self.state.read().await;
            match state.connections.get(connection_id) {
                Some(record) => record.outbound.clone(),
                None => {
                    debug!(connection_id = %connection_id, "send to unknown connection skipped");
                    return Delivery::Closed;
                }
            }
        };
        outbound.deliver(frame)
    }

    /// Every connection except `exclude` whose typing state passes `filter`,
    /// taken from one consistent view of the table.
    pub async fn recipients<F>(&self, exclude: &ConnectionId, filter: F) -> Vec<Recipient>
    where
        F: Fn(Option<&TypingState>) -> bool,
    {
        let state = self.state.read().await;
        state
            .connections
            .iter()
            .filter(|(connection_id, record)| {
                *connection_id != exclude && filter(record.typing.as_ref())
            })
            .map(|(connection_id, record)| Recipient {
                connection_id: connection_id.clone(),
                outbound: record.outbound.clone(),
            })
            .collect()
    }
}
