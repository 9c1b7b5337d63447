use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to sign session token: {0}")]
    Sign(String),
    #[error("Invalid session token: {0}")]
    Invalid(String),
}

/// HS256 keys shared with the auth service that issues sessions
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    /// Mint a session token for `user_id`, returning it with its expiry.
    pub fn issue(&self, user_id: &str) -> Result<(String, usize), SessionError> {
        let now = Utc::now();
        let exp = usize::try_from((now + Duration::seconds(self.ttl_seconds)).timestamp())
            .map_err(|_| SessionError::Sign("expiry out of range".to_string()))?;
        let iat = usize::try_from(now.timestamp())
            .map_err(|_| SessionError::Sign("issue time out of range".to_string()))?;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map(|token| (token, exp))
            .map_err(|err| SessionError::Sign(err.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|decoded| decoded.claims)
            .map_err(|err| SessionError::Invalid(err.to_string()))
    }
}
