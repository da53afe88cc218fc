mod auth;
mod config;
mod cors;
mod error;
mod metrics;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::{jwt::JwtSessionService, session::SessionAuthenticator};
use crate::config::{LogFormat, RelayConfig};
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, HubError,
};
use crate::metrics::HubMetrics;
use crate::ws::{CollaborationHub, Heartbeat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_session_secret() {
        warn!("using the development session secret; set INTELHUB_RELAY_SESSION_SECRET in production");
    }

    let hub_metrics = Arc::new(HubMetrics::default());
    metrics::set_global_metrics(Arc::clone(&hub_metrics));

    let sessions = Arc::new(
        JwtSessionService::new(&config.session_secret, config.session_cookie.clone())
            .context("invalid relay session secret")?,
    );
    let hub = CollaborationHub::new(config.outbound_buffer);
    let app = build_router(&config, hub.clone(), sessions, hub_metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        outbound_buffer = config.outbound_buffer,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
        "starting collaboration hub"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("relay server exited unexpectedly")
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn build_router(
    config: &RelayConfig,
    hub: CollaborationHub,
    authenticator: Arc<dyn SessionAuthenticator>,
    hub_metrics: Arc<HubMetrics>,
) -> Router {
    let heartbeat =
        Heartbeat { interval: config.heartbeat_interval, timeout: config.heartbeat_timeout };

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics).with_state(hub_metrics))
            .merge(ws::router(hub, authenticator, heartbeat))
            .fallback(not_found),
    )
    .layer(cors::cors_layer(config.cors_origins.as_deref()))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(hub_metrics): State<Arc<HubMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        hub_metrics.render_prometheus(),
    )
}

async fn not_found() -> HubError {
    HubError::from_code(ErrorCode::NotFound)
}

/// Stops accepting, then tells every live connection to close.
async fn shutdown_signal(hub: CollaborationHub) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let connections = hub.registry().len().await;
    info!(connections, "shutdown signal received");
    hub.shutdown();
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            HubError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    if let Some(hub_metrics) = metrics::global_metrics() {
        hub_metrics.record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, shutdown_signal};
    use crate::{
        auth::jwt::JwtSessionService, config::RelayConfig, metrics::HubMetrics,
        ws::CollaborationHub,
    };

    fn test_router() -> Router {
        let config = RelayConfig::from_env_fn(|_| Err(std::env::VarError::NotPresent));
        let sessions = Arc::new(
            JwtSessionService::new("intelhub_test_secret_that_is_definitely_long_enough", "intelhub_session")
                .expect("test session service should initialize"),
        );
        let hub_metrics = Arc::new(HubMetrics::default());
        hub_metrics.record_inbound_message("alert_created");
        build_router(&config, CollaborationHub::new(8), sessions, hub_metrics)
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        String::from_utf8(bytes.to_vec()).expect("response body should be valid utf8")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request should build")
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(get_request("/healthz"))
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-abc")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.headers()["x-request-id"], "req-abc");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let response =
            test_router().oneshot(get_request("/metrics")).await.expect("metrics should render");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("hub_inbound_messages_total{type=\"alert_created\"} 1"));
        assert!(body.contains("hub_connections_active"));
    }

    #[tokio::test]
    async fn websocket_route_rejects_missing_session_with_request_id() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("x-request-id", "req-ws-1")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-request-id"], "req-ws-1");
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("body should be json");
        assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");
        assert_eq!(body["error"]["request_id"], "req-ws-1");
    }

    #[tokio::test]
    async fn unknown_route_uses_error_envelope() {
        let response =
            test_router().oneshot(get_request("/nope")).await.expect("request should complete");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("body should be json");
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn shutdown_future_can_drive_graceful_shutdown() {
        fn assert_send<T: Send>(_: &T) {}
        let future = shutdown_signal(CollaborationHub::new(4));
        assert_send(&future);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response =
            app.oneshot(get_request("/panic")).await.expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("body should be json");
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }
}
