// Presence and typing state.
//
// Nothing here stores anything. Typing state lives on the registry record
// of each connection; this module defines its shape, how it turns into the
// payloads peers see, and how room membership is read off it.

use chrono::{DateTime, Utc};
use intelhub_common::{
    protocol::ws::{PresenceNotice, TypingNotice, TypingRequest},
    types::{ContextId, ContextKind},
};

/// What a connection is composing right now. Absent when idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingState {
    pub kind: ContextKind,
    pub context_id: Option<ContextId>,
    pub started_at: DateTime<Utc>,
}

impl TypingState {
    pub fn new(kind: ContextKind, context_id: Option<ContextId>) -> Self {
        Self { kind, context_id, started_at: Utc::now() }
    }
}

/// Decides whether a connection belongs to a room, given its typing state.
///
/// Routing only ever asks this question, so an explicit subscribe protocol
/// can replace the inference below without touching delivery.
pub trait RoomMembershipPolicy: Send + Sync + 'static {
    fn is_member(&self, typing: Option<&TypingState>, room: &ContextId) -> bool;
}

/// A connection is in a room while its last `typing_start` named that
/// context and no `typing_end` has cleared it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferFromTypingContext;

impl RoomMembershipPolicy for InferFromTypingContext {
    fn is_member(&self, typing: Option<&TypingState>, room: &ContextId) -> bool {
        typing.and_then(|state| state.context_id.as_ref()) == Some(room)
    }
}

/// Roster entry for a user currently typing somewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub username: String,
    pub kind: ContextKind,
    pub context_id: Option<ContextId>,
}

pub(crate) fn presence_notice(username: &str) -> PresenceNotice {
    PresenceNotice { username: username.to_owned() }
}

pub(crate) fn typing_started_notice(username: &str, state: &TypingState) -> TypingNotice {
    TypingNotice {
        username: username.to_owned(),
        context_kind: Some(state.kind),
        context_id: state.context_id.clone(),
    }
}

/// `typing_end` frames usually repeat the context they close; older state
/// fills whatever they leave out.
pub(crate) fn typing_ended_notice(
    username: &str,
    request: &TypingRequest,
    previous: Option<&TypingState>,
) -> TypingNotice {
    TypingNotice {
        username: username.to_owned(),
        context_kind: request.context_kind().or_else(|| previous.map(|state| state.kind)),
        context_id: request
            .id
            .clone()
            .or_else(|| previous.and_then(|state| state.context_id.clone())),
    }
}
