//! Caller identity.
//!
//! Tokens are `<userId>.<hex HMAC-SHA256(secret, userId)>`. Chat trusts the
//! user id a valid token carries and does not re-check it against any
//! account store.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use ecobites_shared::UserId;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenVerifier {
    mac: HmacSha256,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Result<Self, ServerError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ServerError::Internal(format!("Invalid auth secret: {e}")))?;
        Ok(Self { mac })
    }

    pub fn issue(&self, user: &UserId) -> String {
        format!("{}.{}", user, hex::encode(self.sign(user)))
    }

    /// Return the user a token speaks for, or `None` if it does not verify.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let (user, signature) = token.trim().rsplit_once('.')?;
        let user = UserId::parse("token", user).ok()?;
        let signature = hex::decode(signature).ok()?;

        let expected = self.sign(&user);
        if signature.len() != expected.len() || expected.ct_eq(&signature).unwrap_u8() != 1 {
            return None;
        }
        Some(user)
    }

    fn sign(&self, user: &UserId) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(user.as_str().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// The verified caller of a protected route.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or(ServerError::Unauthorized)?;
        state
            .tokens
            .verify(token)
            .map(AuthUser)
            .ok_or(ServerError::Unauthorized)
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Check the service token that guards the directory routes.
pub fn verify_service_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.service_token else {
        return Err(ServerError::Forbidden(
            "Directory API is disabled (no SERVICE_TOKEN configured)".into(),
        ));
    };

    let token = bearer(headers).unwrap_or("");
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid service token".into()));
    }

    Ok(())
}
