//! Access token validation.
//!
//! Tokens are HS256 JWTs carrying `{ user_id, exp }`. The REST surface reads
//! them from `Authorization: Bearer`; the WebSocket endpoint reads them from
//! the `token` query parameter, since browsers cannot set headers on an
//! upgrade request.

pub mod extract;

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub use extract::{AuthUser, bearer_token};

use crate::domain::UserId;
use crate::error::HubError;

const INVALID_TOKEN: &str = "the access token is invalid or expired";

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user.
    pub user_id: UserId,
    /// Expiration (Unix seconds).
    pub exp: i64,
}

/// Turns a raw access token into the user it was issued to.
pub trait TokenValidator: Send + Sync + fmt::Debug {
    /// Validates `token` and returns its user id.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unauthorized`] for any malformed, forged or
    /// expired token.
    fn validate(&self, token: &str) -> Result<UserId, HubError>;
}

/// HS256 validator over a shared secret.
pub struct JwtValidator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Creates a validator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs a token for `user_id` that expires `ttl_secs` from now.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Internal`] if encoding fails.
    pub fn issue(&self, user_id: UserId, ttl_secs: i64) -> Result<String, HubError> {
        let claims = Claims {
            user_id,
            exp: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| HubError::Internal(e.to_string()))
    }
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("algorithm", &"HS256")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<UserId, HubError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token verification failed");
                HubError::Unauthorized(INVALID_TOKEN.to_string())
            })?;
        Ok(data.claims.user_id)
    }
}
