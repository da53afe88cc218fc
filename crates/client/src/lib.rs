// intelhub-client: client-side companion of the collaboration hub.
//
// Holds one transport per session, reconnects on a fixed delay, queues
// outbound messages while disconnected and debounces typing signals.

pub mod config;
pub mod debounce;
pub mod manager;
pub mod queue;
pub mod reconnect;
pub mod transport;

pub use config::ClientConfig;
pub use debounce::{TypingDebounce, TypingNotifier, TypingSignal};
pub use manager::{ClientError, ClientEvent, ConnectionState, HubClient};
pub use queue::OutboundQueue;
pub use reconnect::ReconnectPolicy;
pub use transport::{Connector, Link, WebSocketConnector};
