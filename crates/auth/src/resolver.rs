//! Token resolution: credential in, authenticated identity out.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tradepost_core::UserId;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};
use crate::Role;

/// Identity resolution failure.
///
/// Expired tokens are reported distinctly so clients can refresh instead of
/// re-authenticating.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token has expired")]
    Expired,

    #[error("unauthorized")]
    Unauthorized,
}

/// Resolves a bearer credential to verified claims.
///
/// Implementations verify the credential's integrity (signature, encoding)
/// and hand the time-window checks to [`validate_claims`], keeping `now`
/// injectable.
pub trait TokenResolver: Send + Sync {
    fn resolve(&self, credential: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError>;
}

/// On-the-wire claim layout (standard JWT numeric timestamps).
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: Uuid,
    #[serde(default)]
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

/// HS256 (shared-secret) token resolver.
pub struct Hs256TokenResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Hs256TokenResolver {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked deterministically in `validate_claims` so tests
        // and the middleware share one clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenResolver for Hs256TokenResolver {
    fn resolve(&self, credential: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError> {
        let data = jsonwebtoken::decode::<WireClaims>(credential, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::Unauthorized)?;

        let wire = data.claims;
        let issued_at = DateTime::<Utc>::from_timestamp(wire.iat, 0).ok_or(AuthError::Unauthorized)?;
        let expires_at = DateTime::<Utc>::from_timestamp(wire.exp, 0).ok_or(AuthError::Unauthorized)?;

        let claims = JwtClaims {
            sub: UserId::from_uuid(wire.sub),
            roles: wire.roles.into_iter().map(Role::new).collect(),
            issued_at,
            expires_at,
        };

        match validate_claims(&claims, now) {
            Ok(()) => Ok(claims),
            Err(TokenValidationError::Expired) => Err(AuthError::Expired),
            Err(_) => Err(AuthError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn mint(secret: &[u8], sub: Uuid, roles: &[&str], iat: i64, exp: i64) -> String {
        let claims = WireClaims {
            sub,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat,
            exp,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn valid_token_resolves_to_claims() {
        let resolver = Hs256TokenResolver::new(SECRET);
        let now = Utc::now();
        let user = Uuid::now_v7();
        let token = mint(
            SECRET,
            user,
            &["admin"],
            (now - Duration::minutes(1)).timestamp(),
            (now + Duration::hours(1)).timestamp(),
        );

        let claims = resolver.resolve(&token, now).unwrap();
        assert_eq!(claims.sub, UserId::from_uuid(user));
        assert!(claims.is_admin());
    }

    #[test]
    fn expired_token_is_distinguished() {
        let resolver = Hs256TokenResolver::new(SECRET);
        let now = Utc::now();
        let token = mint(
            SECRET,
            Uuid::now_v7(),
            &[],
            (now - Duration::hours(2)).timestamp(),
            (now - Duration::hours(1)).timestamp(),
        );

        assert_eq!(resolver.resolve(&token, now), Err(AuthError::Expired));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let resolver = Hs256TokenResolver::new(SECRET);
        let now = Utc::now();
        let token = mint(
            b"other-secret",
            Uuid::now_v7(),
            &[],
            now.timestamp(),
            (now + Duration::hours(1)).timestamp(),
        );

        assert_eq!(resolver.resolve(&token, now), Err(AuthError::Unauthorized));
    }

    #[test]
    fn garbage_credential_is_unauthorized() {
        let resolver = Hs256TokenResolver::new(SECRET);
        assert_eq!(
            resolver.resolve("not-a-jwt", Utc::now()),
            Err(AuthError::Unauthorized)
        );
    }
}
