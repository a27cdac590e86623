//! Authentication and session-issuance subsystem.
//!
//! Layout mirrors the request path: `principal` resolves bearer tokens to
//! principals and enforces role/impersonation gates, `tokens` is the JWT
//! codec, `storage` owns every credential-store statement, and the
//! remaining modules are the route handlers grouped by flow.

pub mod account;
pub mod admin;
pub mod phone;
pub mod principal;
pub mod recovery;
pub mod roles;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod types;
mod utils;

pub use principal::{AuthedAdmin, AuthedUser, CommonPrincipal, LoginAs};
pub use roles::AdminRole;
pub use state::{AuthConfig, AuthState, PassthroughDecryptor, PayloadDecryptor};
pub use tokens::{SessionClaims, SessionIdentity, SessionTokens, TokenCodec};

/// Rate-limit key for a request: the client IP when derivable, otherwise a
/// shared bucket so unattributable traffic still counts against something.
#[must_use]
pub fn principal_rate_key(headers: &axum::http::HeaderMap) -> String {
    utils::extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}
