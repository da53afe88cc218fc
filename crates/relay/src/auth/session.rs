// Session resolution for websocket upgrades.
//
// The hub never authenticates users itself. It asks a `SessionAuthenticator`
// whether the upgrade request carries an existing session and, if so, who
// it belongs to.

use async_trait::async_trait;
use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap,
};

/// The authenticated principal bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: i64,
    pub username: String,
}

/// The parts of an upgrade request a session can be carried in.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub headers: &'a HeaderMap,
    pub query: Option<&'a str>,
}

impl<'a> SessionRequest<'a> {
    pub fn new(headers: &'a HeaderMap, query: Option<&'a str>) -> Self {
        Self { headers, query }
    }

    /// Every session token the request carries, in precedence order: named
    /// cookie, bearer header, then a `token` query parameter.
    pub fn session_tokens(&self, cookie_name: &str) -> Vec<String> {
        let bearer = self
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer_token)
            .map(ToOwned::to_owned);

        [self.cookie(cookie_name), bearer, self.query_param("token")]
            .into_iter()
            .flatten()
            .collect()
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// Resolve the request to an identity, or `None` when no valid session
    /// is present.
    async fn resolve_session(&self, request: &SessionRequest<'_>) -> Option<SessionIdentity>;
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

#[cfg(test)]
mod tests {
    use super::{extract_bearer_token, SessionRequest};
    use axum::http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap, HeaderValue,
    };

    #[test]
    fn tokens_are_listed_cookie_then_bearer_then_query() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; intelhub_session=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let request = SessionRequest::new(&headers, Some("token=from-query"));

        assert_eq!(
            request.session_tokens("intelhub_session"),
            vec!["from-cookie", "from-header", "from-query"]
        );
    }

    #[test]
    fn absent_sources_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer from-header"));
        let request = SessionRequest::new(&headers, Some("token=from-query"));
        assert_eq!(request.session_tokens("intelhub_session"), vec!["from-header", "from-query"]);

        let empty = HeaderMap::new();
        let request = SessionRequest::new(&empty, Some("a=1&token=abc%2Edef"));
        assert_eq!(request.session_tokens("intelhub_session"), vec!["abc.def"]);
    }

    #[test]
    fn missing_everywhere_yields_nothing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("intelhub_session="));
        let request = SessionRequest::new(&headers, Some("token="));
        assert!(request.session_tokens("intelhub_session").is_empty());
    }

    #[test]
    fn bearer_extraction_requires_scheme_and_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer   "), None);
        assert_eq!(extract_bearer_token("abc"), None);
    }
}
