// `intelhub send`: publish one message and wait for the hub to accept it.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Args;
use intelhub_client::{ClientConfig, Connector, Link, WebSocketConnector};
use intelhub_common::protocol::ws::{ClientMessage, ServerMessage};
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use super::{block_on, millis, HubArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SendArgs {
    #[command(flatten)]
    pub hub: HubArgs,
    /// Message type, e.g. `alert_created` or `intelligence_created`.
    pub message_type: String,
    /// JSON payload carried as `data`.
    #[arg(long)]
    pub data: Option<String>,
    /// Per-step timeout for connect, greeting and close.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SendReceipt {
    pub client_id: String,
    pub message_type: String,
    pub active_users: Vec<String>,
}

pub fn run(args: SendArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.hub.json);
    let result = build_message(&args).and_then(|message| {
        let config = args.hub.client_config()?;
        block_on(send(config, message, millis(args.timeout_ms)))?
    });

    match result {
        Ok(receipt) => {
            output::print_output(format, &receipt, format_human)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

fn build_message(args: &SendArgs) -> anyhow::Result<ClientMessage> {
    let kind = args.message_type.trim();
    if kind.is_empty() {
        bail!("message type must not be empty");
    }
    let data = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;
    Ok(ClientMessage::new(kind, data))
}

async fn send(
    config: ClientConfig,
    message: ClientMessage,
    step_timeout: Duration,
) -> anyhow::Result<SendReceipt> {
    let connector = WebSocketConnector::from_config(&config);
    let Link { outbound, mut inbound } = timeout(step_timeout, connector.connect())
        .await
        .context("timed out connecting to hub")??;

    let greeting = loop {
        match timeout(step_timeout, inbound.recv()).await.context("timed out waiting for hub greeting")? {
            Some(ServerMessage::Connected(frame)) => break frame,
            Some(ServerMessage::Envelope(_)) => continue,
            None => bail!("hub closed the connection before greeting"),
        }
    };

    let message_type = message.kind.clone();
    outbound.send(message).await.map_err(|_| anyhow!("hub transport closed before send"))?;
    drop(outbound);

    // The transport flushes queued frames and a close frame before the
    // inbound side ends.
    let _ = timeout(step_timeout, async { while inbound.recv().await.is_some() {} }).await;

    Ok(SendReceipt {
        client_id: greeting.client_id.to_string(),
        message_type,
        active_users: greeting.active_users,
    })
}

fn format_human(receipt: &SendReceipt) -> String {
    format!(
        "sent {} as {} to {} online user(s)",
        receipt.message_type,
        receipt.client_id,
        receipt.active_users.len()
    )
}
