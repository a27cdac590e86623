//! JWT session codec: two token classes, two independent secrets.
//!
//! Access tokens are short-lived and stateless. Refresh tokens are
//! long-lived and carry the user's token version, so a password change can
//! revoke every refresh token issued before it. The secrets are independent
//! on purpose: leaking one class of key must not allow forging the other.
//!
//! The `Bearer ` prefix is a transport convention: added on issuance,
//! stripped before verification, never part of the signed payload.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum TokenError {
    /// Malformed, forged, expired, or wrong-class token.
    #[error("invalid token")]
    Invalid,
    /// Signing failed; only possible with a broken key setup.
    #[error("failed to sign token")]
    Signing,
}

/// Signed claims. Field names are the wire format consumed by the clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    /// `"admin"` when the session was minted by an admin acting as a user.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// The impersonating admin, when `kind` is `"admin"`.
    #[serde(rename = "adminId", skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<Uuid>,
    /// User token version; refresh verification re-checks it against the
    /// store so stale refresh tokens die on rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ver: Option<i32>,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    #[must_use]
    pub fn is_impersonated(&self) -> bool {
        self.kind.as_deref() == Some("admin")
    }
}

/// Access + refresh pair, both carrying the `Bearer ` prefix.
#[derive(Clone, Debug, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Identity embedded into a session pair.
#[derive(Clone, Debug)]
pub struct SessionIdentity {
    pub id: Uuid,
    pub email: String,
    /// Set when an admin mints this session for a user account.
    pub impersonator: Option<Uuid>,
    pub token_version: Option<i32>,
}

pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        access_secret: &SecretString,
        refresh_secret: &SecretString,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.expose_secret().as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.expose_secret().as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.expose_secret().as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.expose_secret().as_bytes()),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Issue an access/refresh pair for the given identity.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if either token cannot be signed.
    pub fn issue_session(&self, identity: &SessionIdentity) -> Result<SessionTokens, TokenError> {
        let access = self.sign(identity, &self.access_encoding, self.access_ttl_seconds)?;
        let refresh = self.sign(identity, &self.refresh_encoding, self.refresh_ttl_seconds)?;
        Ok(SessionTokens {
            access_token: format!("{BEARER_PREFIX}{access}"),
            refresh_token: format!("{BEARER_PREFIX}{refresh}"),
        })
    }

    /// Issue only an access token (admin logins carry no refresh token).
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if the token cannot be signed.
    pub fn issue_access(&self, identity: &SessionIdentity) -> Result<String, TokenError> {
        let access = self.sign(identity, &self.access_encoding, self.access_ttl_seconds)?;
        Ok(format!("{BEARER_PREFIX}{access}"))
    }

    /// Verify a bearer access token.
    ///
    /// # Errors
    /// Returns `TokenError::Invalid` on any signature, shape, or expiry failure.
    pub fn verify_access(&self, token: &str) -> Result<SessionClaims, TokenError> {
        Self::verify(token, &self.access_decoding)
    }

    /// Verify a bearer refresh token.
    ///
    /// # Errors
    /// Returns `TokenError::Invalid` on any signature, shape, or expiry failure.
    pub fn verify_refresh(&self, token: &str) -> Result<SessionClaims, TokenError> {
        Self::verify(token, &self.refresh_decoding)
    }

    fn sign(
        &self,
        identity: &SessionIdentity,
        key: &EncodingKey,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let now = unix_now();
        let claims = SessionClaims {
            id: identity.id,
            email: identity.email.clone(),
            kind: identity.impersonator.map(|_| "admin".to_string()),
            admin_id: identity.impersonator,
            ver: identity.token_version,
            iat: now,
            exp: now + ttl_seconds,
        };
        encode(&Header::default(), &claims, key).map_err(|_| TokenError::Signing)
    }

    fn verify(token: &str, key: &DecodingKey) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<SessionClaims>(strip_bearer(token), key, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }
}

/// Strip the transport prefix; raw tokens pass through unchanged.
#[must_use]
pub fn strip_bearer(token: &str) -> &str {
    let trimmed = token.trim();
    trimmed
        .strip_prefix(BEARER_PREFIX)
        .or_else(|| trimmed.strip_prefix("bearer "))
        .unwrap_or(trimmed)
        .trim()
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            &SecretString::from("access-secret"),
            &SecretString::from("refresh-secret"),
            3600,
            86_400,
        )
    }

    fn identity() -> SessionIdentity {
        SessionIdentity {
            id: Uuid::new_v4(),
            email: "donor@example.com".to_string(),
            impersonator: None,
            token_version: Some(0),
        }
    }

    #[test]
    fn session_round_trip_recovers_identity() {
        let codec = codec();
        let identity = identity();
        let tokens = codec.issue_session(&identity).expect("issue");

        let access = codec.verify_access(&tokens.access_token).expect("access");
        assert_eq!(access.id, identity.id);
        assert_eq!(access.email, identity.email);
        assert_eq!(access.kind, None);
        assert_eq!(access.admin_id, None);
        assert_eq!(access.ver, Some(0));

        let refresh = codec
            .verify_refresh(&tokens.refresh_token)
            .expect("refresh");
        assert_eq!(refresh.id, identity.id);
        assert_eq!(refresh.email, identity.email);
    }

    #[test]
    fn impersonated_session_carries_type_and_admin_id() {
        let codec = codec();
        let admin_id = Uuid::new_v4();
        let identity = SessionIdentity {
            impersonator: Some(admin_id),
            ..identity()
        };
        let tokens = codec.issue_session(&identity).expect("issue");
        let claims = codec.verify_access(&tokens.access_token).expect("verify");
        assert_eq!(claims.kind.as_deref(), Some("admin"));
        assert_eq!(claims.admin_id, Some(admin_id));
        assert!(claims.is_impersonated());
    }

    #[test]
    fn tokens_are_bearer_prefixed_and_prefix_is_optional_on_verify() {
        let codec = codec();
        let tokens = codec.issue_session(&identity()).expect("issue");
        assert!(tokens.access_token.starts_with(BEARER_PREFIX));
        assert!(tokens.refresh_token.starts_with(BEARER_PREFIX));

        let raw = tokens
            .access_token
            .strip_prefix(BEARER_PREFIX)
            .expect("prefix");
        assert!(codec.verify_access(raw).is_ok());
    }

    #[test]
    fn access_and_refresh_secrets_are_not_interchangeable() {
        let codec = codec();
        let tokens = codec.issue_session(&identity()).expect("issue");
        assert!(codec.verify_refresh(&tokens.access_token).is_err());
        assert!(codec.verify_access(&tokens.refresh_token).is_err());
    }

    #[test]
    fn wrong_secret_never_verifies() {
        let codec = codec();
        let other = TokenCodec::new(
            &SecretString::from("other-access"),
            &SecretString::from("other-refresh"),
            3600,
            86_400,
        );
        let tokens = codec.issue_session(&identity()).expect("issue");
        assert!(other.verify_access(&tokens.access_token).is_err());
        assert!(other.verify_refresh(&tokens.refresh_token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let expired = TokenCodec::new(
            &SecretString::from("access-secret"),
            &SecretString::from("refresh-secret"),
            -120,
            -120,
        );
        let tokens = expired.issue_session(&identity()).expect("issue");
        // Same secrets, fresh TTLs: only the embedded expiry differs.
        let codec = codec();
        assert!(codec.verify_access(&tokens.access_token).is_err());
        assert!(codec.verify_refresh(&tokens.refresh_token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let codec = codec();
        assert!(codec.verify_access("Bearer not-a-jwt").is_err());
        assert!(codec.verify_access("").is_err());
    }

    #[test]
    fn strip_bearer_variants() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("bearer abc"), "abc");
        assert_eq!(strip_bearer("  Bearer abc  "), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
    }
}
