//! JWT access token creation and verification.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::User;
use crate::errors::Error;

/// Access token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: u64,
    pub email: String,
    pub name: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique token id, used to revoke a single token
    pub jti: String,
}

impl AccessClaims {
    pub fn new(user: &User, lifetime: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            exp: now + lifetime.as_secs() as i64,
            iat: now,
            jti: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Seconds until the token expires, zero once it has.
    pub fn remaining(&self) -> Duration {
        Duration::from_secs((self.exp - Utc::now().timestamp()).max(0) as u64)
    }
}

/// Create an HS256 access token for `user`
pub fn create_access_token(user: &User, secret: &str, lifetime: Duration) -> Result<String, Error> {
    let claims = AccessClaims::new(user, lifetime);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode an access token
pub fn verify_access_token(token: &str, secret: &str) -> Result<AccessClaims, Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.leeway = 0;

    let data = decode::<AccessClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::Unauthenticated {
            message: Some("Invalid or expired token".to_string()),
        },
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn user() -> User {
        User {
            id: 7,
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_claims() {
        let token = create_access_token(&user(), SECRET, Duration::from_secs(60)).unwrap();
        let claims = verify_access_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.exp - claims.iat, 60);
        assert!(claims.remaining() <= Duration::from_secs(60));
    }

    #[test]
    fn test_wrong_secret_and_garbage_are_unauthenticated() {
        let token = create_access_token(&user(), SECRET, Duration::from_secs(60)).unwrap();
        assert!(matches!(
            verify_access_token(&token, "another-secret-another-secret-xx"),
            Err(Error::Unauthenticated { .. })
        ));
        assert!(matches!(
            verify_access_token("invalid.token.here", SECRET),
            Err(Error::Unauthenticated { .. })
        ));
    }

    #[test]
    fn test_expired_token() {
        let mut claims = AccessClaims::new(&user(), Duration::from_secs(60));
        claims.exp = Utc::now().timestamp() - 10;
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        assert!(matches!(
            verify_access_token(&token, SECRET),
            Err(Error::Unauthenticated { .. })
        ));
    }
}
