use intelhub_common::protocol::ws::{decode_server_message, message_type, ServerMessage};

const RELAY_CONFIG_SOURCE: &str = include_str!("../src/config.rs");
const RELAY_WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");
const RELAY_WS_REGISTRY_SOURCE: &str = include_str!("../src/ws/registry.rs");
const RELAY_WS_HUB_SOURCE: &str = include_str!("../src/ws/hub.rs");

#[test]
fn websocket_contract_heartbeat_and_buffer_defaults() {
    let heartbeat_interval_ms = parse_u64_const(RELAY_CONFIG_SOURCE, "DEFAULT_HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(RELAY_CONFIG_SOURCE, "DEFAULT_HEARTBEAT_TIMEOUT_MS");
    let outbound_buffer = parse_u64_const(RELAY_CONFIG_SOURCE, "DEFAULT_OUTBOUND_BUFFER");

    assert_eq!(heartbeat_interval_ms, 30_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert_eq!(outbound_buffer, 256);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_authenticates_before_upgrade() {
    let admit = RELAY_WS_HANDLER_SOURCE.find(".admit(").expect("handler must admit the session");
    let upgrade =
        RELAY_WS_HANDLER_SOURCE.find(".on_upgrade(").expect("handler must upgrade the socket");
    assert!(admit < upgrade, "session must be resolved before the upgrade completes");
    assert!(RELAY_WS_HANDLER_SOURCE.contains(".route(\"/ws\""));
}

#[test]
fn websocket_contract_close_codes() {
    assert!(RELAY_WS_HANDLER_SOURCE.contains("CloseReason::HeartbeatTimeout => (close_code::POLICY"));
    assert!(RELAY_WS_HANDLER_SOURCE.contains("CloseReason::SlowConsumer => (close_code::AGAIN"));
    assert!(RELAY_WS_HANDLER_SOURCE.contains("CloseReason::ServerShutdown => (close_code::AWAY"));
}

#[test]
fn websocket_contract_fan_out_never_blocks_on_a_peer() {
    assert!(RELAY_WS_REGISTRY_SOURCE.contains("try_send("));
    assert!(!RELAY_WS_REGISTRY_SOURCE.contains(".send(frame).await"));
    assert!(RELAY_WS_HUB_SOURCE.contains("register_with_greeting"));
}

#[test]
fn websocket_contract_server_frames_decode() {
    let connected = decode_server_message(
        r#"{"type":"connected","clientId":"abc","activeUsers":["ana","ben"]}"#,
    )
    .expect("connected frame should decode");
    match connected {
        ServerMessage::Connected(frame) => {
            assert_eq!(frame.client_id.as_str(), "abc");
            assert_eq!(frame.active_users, vec!["ana", "ben"]);
        }
        other => panic!("expected connected frame, got {other:?}"),
    }

    let envelope = decode_server_message(
        r#"{"type":"user_active","data":{"username":"ana"},"senderId":"abc"}"#,
    )
    .expect("envelope should decode");
    match envelope {
        ServerMessage::Envelope(envelope) => {
            assert_eq!(envelope.kind, message_type::USER_ACTIVE);
            assert_eq!(envelope.sender_id.as_str(), "abc");
        }
        other => panic!("expected envelope, got {other:?}"),
    }
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
