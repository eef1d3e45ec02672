use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Container for the authenticated user's id stored in request extensions.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser(pub Uuid);

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - the user's UUID as a string.
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Signing secret and lifetime of access tokens.
#[derive(Clone)]
pub struct TokenKeys {
    secret: Arc<str>,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> BillingResult<String> {
        issue_token(user_id, &self.secret, self.ttl)
    }

    pub fn verify(&self, token: &str) -> BillingResult<Uuid> {
        decode_token(token, &self.secret)
    }
}

pub fn issue_token(user_id: Uuid, secret: &str, ttl: Duration) -> BillingResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp().max(0) as usize,
        exp: (now + ttl).timestamp().max(0) as usize,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| BillingError::Internal(format!("failed to sign token: {}", e)))
}

/// Validates signature and expiry and returns the subject.
pub fn decode_token(token: &str, secret: &str) -> BillingResult<Uuid> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<Claims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            BillingError::Unauthorized
        })?
        .claims;

    Uuid::parse_str(&claims.sub).map_err(|_| BillingError::Unauthorized)
}

/// Middleware to validate a Bearer JWT in the `Authorization` header.
///
/// On success the request is forwarded with [`CurrentUser`] in its
/// extensions; on failure a `401` is returned.
pub async fn jwt_middleware(
    State(keys): State<TokenKeys>,
    mut req: Request,
    next: Next,
) -> Result<Response, BillingError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(BillingError::Unauthorized)?;

    let user_id = keys.verify(token)?;
    req.extensions_mut().insert(CurrentUser(user_id));

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = BillingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(BillingError::Unauthorized)
    }
}
