// `intelhub listen`: print live hub events.

use clap::Args;
use intelhub_client::{ClientConfig, ClientEvent, HubClient};
use intelhub_common::protocol::ws::Envelope;
use serde::Serialize;

use super::{block_on, millis, HubArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ListenArgs {
    #[command(flatten)]
    pub hub: HubArgs,
    /// Exit after this many relayed messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Delay between reconnect attempts.
    #[arg(long, default_value_t = 2000)]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventView<'a> {
    #[serde(rename_all = "camelCase")]
    Connected { client_id: &'a str, active_users: &'a [String] },
    Message {
        #[serde(flatten)]
        envelope: &'a Envelope,
    },
    Disconnected { reason: &'a str },
}

impl<'a> From<&'a ClientEvent> for EventView<'a> {
    fn from(event: &'a ClientEvent) -> Self {
        match event {
            ClientEvent::Connected { client_id, active_users } => {
                Self::Connected { client_id: client_id.as_str(), active_users }
            }
            ClientEvent::Message(envelope) => Self::Message { envelope },
            ClientEvent::Disconnected { reason } => Self::Disconnected { reason },
        }
    }
}

pub fn run(args: ListenArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.hub.json);
    let result = args.hub.client_config().and_then(|config| {
        let config = config.with_reconnect_delay(millis(args.reconnect_delay_ms));
        block_on(listen(config, format, args.count))?
    });

    if let Err(error) = &result {
        output::print_anyhow_error(format, error);
    }
    result
}

async fn listen(config: ClientConfig, format: OutputFormat, count: Option<usize>) -> anyhow::Result<()> {
    let (client, mut events) = HubClient::connect(config);
    let mut relayed = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                output::print_output(format, &EventView::from(&event), format_human)?;
                if matches!(event, ClientEvent::Message(_)) {
                    relayed += 1;
                    if count.is_some_and(|limit| relayed >= limit) {
                        break;
                    }
                }
            }
        }
    }

    client.shutdown();
    Ok(())
}

fn format_human(view: &EventView<'_>) -> String {
    match view {
        EventView::Connected { client_id, active_users } => {
            format!("connected as {client_id} ({} online: {})", active_users.len(), active_users.join(", "))
        }
        EventView::Message { envelope } => match &envelope.data {
            Some(data) => format!("{} from {}: {data}", envelope.kind, envelope.sender_id),
            None => format!("{} from {}", envelope.kind, envelope.sender_id),
        },
        EventView::Disconnected { reason } => format!("disconnected: {reason} (reconnecting)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelhub_common::types::ConnectionId;
    use serde_json::json;

    #[test]
    fn message_event_json_flattens_envelope() {
        let event = ClientEvent::Message(Envelope::new(
            "alert_created",
            Some(json!({"alertId": 5})),
            ConnectionId::from("peer"),
        ));
        let value = serde_json::to_value(EventView::from(&event)).expect("view should serialize");
        assert_eq!(
            value,
            json!({"event": "message", "type": "alert_created", "data": {"alertId": 5}, "senderId": "peer"})
        );
    }

    #[test]
    fn connected_event_uses_wire_field_names() {
        let event = ClientEvent::Connected {
            client_id: ConnectionId::from("me"),
            active_users: vec!["ana".into(), "ben".into()],
        };
        let value = serde_json::to_value(EventView::from(&event)).expect("view should serialize");
        assert_eq!(value["event"], "connected");
        assert_eq!(value["clientId"], "me");
        assert_eq!(value["activeUsers"], json!(["ana", "ben"]));
        assert_eq!(format_human(&EventView::from(&event)), "connected as me (2 online: ana, ben)");
    }

    #[test]
    fn human_lines_for_messages_and_disconnects() {
        let event = ClientEvent::Message(Envelope::new("filter_change", None, ConnectionId::from("p1")));
        assert_eq!(format_human(&EventView::from(&event)), "filter_change from p1");

        let event = ClientEvent::Disconnected { reason: "connection closed".into() };
        assert_eq!(
            format_human(&EventView::from(&event)),
            "disconnected: connection closed (reconnecting)"
        );
    }
}
