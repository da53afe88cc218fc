// Transport abstraction for the hub connection.
//
// A `Link` is one live transport seen as a pair of channels. The
// connection manager never touches sockets directly, so tests can hand it
// in-memory links.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use intelhub_common::protocol::ws::{
    decode_server_message, encode_message, ClientMessage, ServerMessage,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;

const LINK_BUFFER: usize = 64;

/// One open transport. Dropping `outbound` closes it; `inbound` yielding
/// `None` means the transport closed.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

impl Link {
    /// Build a link plus the far ends of its channels.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<ClientMessage>, mpsc::Sender<ServerMessage>) {
        let (outbound, outbound_rx) = mpsc::channel(buffer);
        let (inbound_tx, inbound) = mpsc::channel(buffer);
        (Self { outbound, inbound }, outbound_rx, inbound_tx)
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link>;
}

/// Connects over `tokio-tungstenite`, presenting the session token as a
/// bearer header on the upgrade request.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    session_token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: Url, session_token: Option<String>) -> Self {
        Self { url, session_token }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.url.clone(), config.session_token.clone())
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid hub url `{}`", self.url))?;
        if let Some(token) = &self.session_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("session token is not a valid header value")?;
            request.headers_mut().insert("authorization", value);
        }

        let (socket, _) = connect_async(request)
            .await
            .with_context(|| format!("failed to connect to hub at {}", self.url))?;
        let (mut sink, mut stream) = socket.split();
        let (link, mut outbound_rx, inbound_tx) = Link::pair(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match encode_message(&message) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(message_type = %message.kind, error = %error, "failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(error) = sink.send(Message::text(text)).await {
                    debug!(error = %error, "hub transport write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        debug!(error = %error, "hub transport read failed");
                        break;
                    }
                };
                match decode_server_message(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => warn!(error = %error, "dropping undecodable hub frame"),
                }
            }
        });

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelhub_common::protocol::ws::decode_client_message;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{
        accept_hdr_async,
        tungstenite::handshake::server::{ErrorResponse, Request, Response},
    };

    #[tokio::test]
    async fn websocket_connector_sends_bearer_and_relays_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should expose address");
        let seen_auth = Arc::new(Mutex::new(None::<String>));
        let seen_auth_server = Arc::clone(&seen_auth);

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept should succeed");
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *seen_auth_server.lock().expect("lock") = request
                    .headers()
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(ToOwned::to_owned);
                Ok(response)
            };
            let mut socket = accept_hdr_async(stream, callback).await.expect("handshake should succeed");
            socket
                .send(Message::text(
                    json!({"type": "connected", "clientId": "abc", "activeUsers": ["ana"]}).to_string(),
                ))
                .await
                .expect("greeting should send");

            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("expected a text frame, got {other:?}"),
                }
            }
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url should parse");
        let connector = WebSocketConnector::new(url, Some("tok-123".to_owned()));
        let mut link = connector.connect().await.expect("connector should connect");

        match link.inbound.recv().await {
            Some(ServerMessage::Connected(frame)) => {
                assert_eq!(frame.client_id.as_str(), "abc");
                assert_eq!(frame.active_users, vec!["ana"]);
            }
            other => panic!("expected connected frame, got {other:?}"),
        }

        link.outbound
            .send(ClientMessage::new("filter_change", Some(json!({"severity": "high"}))))
            .await
            .expect("outbound should accept");

        let received = server.await.expect("server task should finish");
        let decoded = decode_client_message(&received).expect("client frame should decode");
        assert_eq!(decoded.kind, "filter_change");
        assert_eq!(seen_auth.lock().expect("lock").as_deref(), Some("Bearer tok-123"));
    }

    #[tokio::test]
    async fn unreachable_hub_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should expose address");
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url should parse");
        let error = WebSocketConnector::new(url, None)
            .connect()
            .await
            .expect_err("connect should fail");
        assert!(error.to_string().contains("failed to connect to hub"));
    }
}
