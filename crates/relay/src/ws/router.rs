use std::sync::Arc;

use intelhub_common::{
    protocol::ws::{
        encode_message, message_type, ClientMessage, Envelope, ProtocolError, TypingRequest,
    },
    types::{ConnectionId, ContextId, ContextKind},
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::presence::{
    typing_ended_notice, typing_started_notice, InferFromTypingContext, RoomMembershipPolicy,
    TypingState,
};
use super::registry::{ConnectionRegistry, Delivery, Frame, Recipient};
use crate::metrics;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("typing_start requires data.type")]
    MissingTypingContext,
    #[error("unknown typing context kind '{0}'")]
    UnknownContextKind(String),
}

/// Delivery policy chosen for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    TypingStart { kind: ContextKind, context_id: Option<ContextId> },
    TypingEnd(TypingRequest),
    /// Peers in `room`. With no room the filter passes everyone.
    Room(Option<ContextId>),
    Global,
}

pub fn classify(message: &ClientMessage) -> Result<Route, RouteError> {
    match message.kind.as_str() {
        message_type::TYPING_START => {
            let request = TypingRequest::from_data(message.data.as_ref());
            let kind = match request.kind.as_deref() {
                None => return Err(RouteError::MissingTypingContext),
                Some(raw) => {
                    ContextKind::parse(raw).ok_or_else(|| RouteError::UnknownContextKind(raw.into()))?
                }
            };
            Ok(Route::TypingStart { kind, context_id: request.id })
        }
        message_type::TYPING_END => {
            Ok(Route::TypingEnd(TypingRequest::from_data(message.data.as_ref())))
        }
        message_type::ANNOTATION_CREATED | message_type::ANNOTATION_UPDATED => {
            Ok(Route::Room(annotation_room(message.data.as_ref())))
        }
        message_type::FILTER_CHANGE => Ok(Route::Room(None)),
        _ => Ok(Route::Global),
    }
}

fn annotation_room(data: Option<&Value>) -> Option<ContextId> {
    data?.get("intelligenceId").and_then(ContextId::from_json)
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub closed: usize,
    pub evicted: usize,
}

impl FanOut {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Queued => self.delivered += 1,
            Delivery::Closed => self.closed += 1,
            Delivery::Full => self.evicted += 1,
        }
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    membership: Arc<dyn RoomMembershipPolicy>,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self::with_membership_policy(registry, Arc::new(InferFromTypingContext))
    }

    pub fn with_membership_policy(
        registry: ConnectionRegistry,
        membership: Arc<dyn RoomMembershipPolicy>,
    ) -> Self {
        Self { registry, membership }
    }

    /// Apply exactly one delivery policy to a message from `sender`.
    pub async fn dispatch(
        &self,
        sender: &ConnectionId,
        message: ClientMessage,
    ) -> Result<FanOut, RouteError> {
        let route = classify(&message)?;
        metrics::record_inbound_message(&message.kind);

        match route {
            Route::TypingStart { kind, context_id } => {
                let state = TypingState::new(kind, context_id);
                let Some(update) = self.registry.set_typing(sender, Some(state.clone())).await
                else {
                    return Ok(FanOut::default());
                };
                let notice = typing_started_notice(&update.username, &state);
                self.broadcast(&Envelope::new(
                    message.kind,
                    Some(serde_json::to_value(notice).map_err(ProtocolError::from)?),
                    sender.clone(),
                ))
                .await
            }
            Route::TypingEnd(request) => {
                let Some(update) = self.registry.set_typing(sender, None).await else {
                    return Ok(FanOut::default());
                };
                let notice =
                    typing_ended_notice(&update.username, &request, update.previous.as_ref());
                self.broadcast(&Envelope::new(
                    message.kind,
                    Some(serde_json::to_value(notice).map_err(ProtocolError::from)?),
                    sender.clone(),
                ))
                .await
            }
            Route::Room(room) => {
                let envelope = Envelope::new(message.kind, message.data, sender.clone());
                self.broadcast_to_room(&envelope, room.as_ref()).await
            }
            Route::Global => {
                let envelope = Envelope::new(message.kind, message.data, sender.clone());
                self.broadcast(&envelope).await
            }
        }
    }

    /// Every open connection except the envelope's sender.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<FanOut, RouteError> {
        let frame = encode_frame(envelope)?;
        let recipients = self.registry.recipients(&envelope.sender_id, |_| true).await;
        Ok(deliver_all(envelope, &frame, recipients))
    }

    /// Every open connection except the sender that the membership policy
    /// places in `room`. `None` reaches everyone.
    pub async fn broadcast_to_room(
        &self,
        envelope: &Envelope,
        room: Option<&ContextId>,
    ) -> Result<FanOut, RouteError> {
        let frame = encode_frame(envelope)?;
        let membership = Arc::clone(&self.membership);
        let recipients = self
            .registry
            .recipients(&envelope.sender_id, |typing| match room {
                Some(room) => membership.is_member(typing, room),
                None => true,
            })
            .await;
        Ok(deliver_all(envelope, &frame, recipients))
    }
}

fn deliver_all(envelope: &Envelope, frame: &Frame, recipients: Vec<Recipient>) -> FanOut {
    let mut fan_out = FanOut::default();
    for recipient in recipients {
        let delivery = recipient.outbound.deliver(frame);
        match delivery {
            Delivery::Queued => {}
            Delivery::Closed => debug!(
                connection_id = %recipient.connection_id,
                message_type = %envelope.kind,
                "skipped delivery to closed connection"
            ),
            Delivery::Full => warn!(
                connection_id = %recipient.connection_id,
                message_type = %envelope.kind,
                "outbound buffer full, evicting slow consumer"
            ),
        }
        fan_out.record(delivery);
    }
    metrics::record_fan_out(fan_out.delivered, fan_out.closed, fan_out.evicted);
    fan_out
}

pub(crate) fn encode_frame<T: serde::Serialize>(message: &T) -> Result<Frame, ProtocolError> {
    Ok(Arc::from(encode_message(message)?))
}
