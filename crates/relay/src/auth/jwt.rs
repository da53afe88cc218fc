use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::session::{SessionAuthenticator, SessionIdentity, SessionRequest};

pub const SESSION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    username: String,
    iat: i64,
    exp: i64,
}

/// HS256 session tokens minted by the login path and checked on upgrade.
#[derive(Clone)]
pub struct JwtSessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    cookie_name: String,
}

impl JwtSessionService {
    pub fn new(secret: &str, cookie_name: impl Into<String>) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("session secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            cookie_name: cookie_name.into(),
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn issue_session_token(&self, user_id: i64, username: &str) -> anyhow::Result<String> {
        self.issue_session_token_at(user_id, username, current_unix_timestamp()?)
    }

    fn issue_session_token_at(
        &self,
        user_id: i64,
        username: &str,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            username: username.to_owned(),
            iat: issued_at,
            exp: issued_at + SESSION_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode session token")
    }

    pub fn validate_session_token(&self, token: &str) -> anyhow::Result<SessionIdentity> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode session token")?
            .claims;

        let user_id = claims
            .sub
            .parse::<i64>()
            .with_context(|| format!("session subject '{}' is not a user id", claims.sub))?;
        if claims.username.trim().is_empty() {
            bail!("session token for user {user_id} carries an empty username");
        }

        Ok(SessionIdentity { user_id, username: claims.username })
    }
}

#[async_trait]
impl SessionAuthenticator for JwtSessionService {
    async fn resolve_session(&self, request: &SessionRequest<'_>) -> Option<SessionIdentity> {
        request.session_tokens(&self.cookie_name).into_iter().find_map(|token| {
            self.validate_session_token(&token)
                .map_err(|error| debug!(error = %error, "session token rejected"))
                .ok()
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
