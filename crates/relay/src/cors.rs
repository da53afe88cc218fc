// CORS for the hub's HTTP surface.
//
// Origins come from `INTELHUB_RELAY_CORS_ORIGINS` via `RelayConfig`
// (comma-separated, or `*`). When unset, the local web app dev servers are
// allowed.

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:5000",
    "http://localhost:5173",
    "http://127.0.0.1:5000",
    "http://127.0.0.1:5173",
];

/// Session cookies ride along on credentialed requests, except under `*`
/// where browsers forbid it.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, HeaderName::from_static("x-request-id")])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    match origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()),
        Some(list) if !list.is_empty() => {
            base.allow_origin(parse_origins(list)).allow_credentials(true)
        }
        _ => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))).allow_credentials(true),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn test_app(origins: Option<&str>) -> Router {
        Router::new().route("/healthz", get(|| async { "ok" })).layer(cors_layer(origins))
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/healthz")
            .header("origin", origin)
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .expect("preflight request should build")
    }

    #[tokio::test]
    async fn dev_origin_is_allowed_with_credentials() {
        let response = test_app(None)
            .oneshot(preflight("http://localhost:5173"))
            .await
            .expect("preflight should complete");

        assert_eq!(response.headers()["access-control-allow-origin"], "http://localhost:5173");
        assert_eq!(response.headers()["access-control-allow-credentials"], "true");
        assert_eq!(response.headers()["access-control-max-age"], "3600");
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_allow_header() {
        let response = test_app(Some("https://intel.example.org"))
            .oneshot(preflight("https://evil.example.com"))
            .await
            .expect("preflight should complete");

        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn configured_list_replaces_defaults() {
        let app = test_app(Some("https://intel.example.org, https://staging.example.org"));

        let allowed = app
            .clone()
            .oneshot(preflight("https://staging.example.org"))
            .await
            .expect("preflight should complete");
        assert_eq!(
            allowed.headers()["access-control-allow-origin"],
            "https://staging.example.org"
        );

        let dev = app.oneshot(preflight("http://localhost:5173")).await.expect("preflight");
        assert!(dev.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn wildcard_allows_any_origin_without_credentials() {
        let response = test_app(Some("*"))
            .oneshot(preflight("https://anything.example.com"))
            .await
            .expect("preflight should complete");

        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().get("access-control-allow-credentials").is_none());
    }

    #[test]
    fn parse_origins_skips_blanks() {
        let origins = parse_origins(" https://a.example , ,https://b.example ");
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }
}
