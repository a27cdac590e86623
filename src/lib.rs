//! # Donara (Donation Platform Identity & Session API)
//!
//! `donara` is the account and authentication backend for a multi-tenant
//! donation/crowdfunding platform. It owns phone/email signup and login,
//! one-time verification codes, JWT access/refresh session issuance, and
//! the authorization checks applied to every authenticated request.
//!
//! ## Principals
//!
//! Two principal kinds exist: **users** (donors and campaign owners, who may
//! authenticate by phone OTP, by email/password, or both) and **admins**
//! (back-office operators with a closed set of roles). A deactivated
//! principal is rejected at every authentication entry point, even when it
//! presents a still-valid token.
//!
//! ## Sessions
//!
//! Sessions are a pair of JWTs signed with independent secrets: a
//! short-lived access token and a long-lived refresh token. Refresh tokens
//! carry the user's token version; changing the password bumps the version
//! and invalidates every outstanding refresh token.
//!
//! ## Impersonation
//!
//! An admin may mint a session scoped to a user account for support
//! purposes. Such sessions are marked in the token claims, may read the
//! user's data, and are rejected by sensitive self-service mutations.

pub mod api;
pub mod cli;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
