//! Bearer token verification.
//!
//! Tokens are HS256 JWTs minted by the auth service with claims
//! `{ id, exp }`. A valid signature is not enough: the user must still exist.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_core::store::UserStore;
use parley_core::{bearer_token, CoreError, CoreResult, IdentityVerifier, UserIdentity};
use parley_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub id: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Verifies HS256 tokens against the user store.
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    users: Arc<dyn UserStore>,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration, users: Arc<dyn UserStore>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
            users,
        }
    }

    /// Mint a token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            id: user_id.to_string(),
            exp: chrono::Utc::now().timestamp().saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    fn claims(&self, token: &str) -> CoreResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                CoreError::Unauthorized
            })
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> CoreResult<UserIdentity> {
        let claims = self.claims(credential)?;
        let user_id = Uuid::parse_str(&claims.id).map_err(|_| CoreError::Unauthorized)?;
        let Some(user) = self.users.user(user_id).await? else {
            debug!(user = %user_id, "Token for unknown user");
            return Err(CoreError::Unauthorized);
        };
        Ok(UserIdentity {
            user_id: user.id,
            name: user.name,
            email: user.email,
        })
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserIdentity);

impl AuthUser {
    #[must_use]
    pub fn id(&self) -> UserId {
        self.0.user_id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(ApiError::unauthorized)?;
        let identity = state.verifier.verify(token).await?;
        Ok(AuthUser(identity))
    }
}
