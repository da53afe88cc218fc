// Real-time collaboration hub.
//
// registry  - the only shared mutable state: live connections and their typing state
// presence  - typing state shape, room membership policy, presence payloads
// router    - inbound message classification and fan-out policies
// hub       - connection lifecycle (admit, connect, close, shutdown)
// handler   - axum `/ws` upgrade and the per-connection socket task

mod handler;
mod hub;
mod presence;
mod registry;
mod router;

pub use handler::{router, Heartbeat};
pub use hub::{CloseReason, CollaborationHub, ConnectionState, HubSession};
pub use presence::{InferFromTypingContext, RoomMembershipPolicy, TypingState, TypingUser};
pub use registry::{ConnectionRegistry, Delivery, OutboundHandle, OutboundReceiver};
pub use router::{classify, FanOut, MessageRouter, Route, RouteError};
