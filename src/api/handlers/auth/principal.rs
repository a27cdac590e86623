//! Bearer-token authentication and per-request authorization checks.
//!
//! Flow per request: extract the bearer token, verify it as an access
//! token, resolve the principal fresh from the store with a minimal
//! projection, and re-check the active flag. Account status is never
//! trusted from the token: a principal deactivated after issuance is
//! rejected on its next request.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::roles::AdminRole;
use super::state::AuthState;
use super::storage::{
    AdminRecord, UserRecord, fetch_admin_role, find_admin_for_auth, find_user_for_auth,
};
use crate::api::response::ApiError;

/// How the current session was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginAs {
    User,
    Admin,
}

impl LoginAs {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

/// A resolved user principal plus impersonation metadata.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub user: UserRecord,
    pub login_as: LoginAs,
    /// The impersonating admin when `login_as` is `Admin`.
    pub admin_id: Option<Uuid>,
}

/// A resolved admin principal.
#[derive(Clone, Debug)]
pub struct AuthedAdmin {
    pub admin: AdminRecord,
}

/// Either principal kind, for endpoints shared across both.
#[derive(Clone, Debug)]
pub enum CommonPrincipal {
    Admin(AdminRecord),
    User(UserRecord),
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve the request to an active user or reject with 401.
pub async fn require_user_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<AuthedUser, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(ApiError::NoToken);
    };
    authenticate_user(&token, pool, state).await
}

/// Like `require_user_auth`, but a missing header is not an error; the
/// request continues unauthenticated.
pub async fn optional_user_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Option<AuthedUser>, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    authenticate_user(&token, pool, state).await.map(Some)
}

async fn authenticate_user(
    token: &str,
    pool: &PgPool,
    state: &AuthState,
) -> Result<AuthedUser, ApiError> {
    let claims = state
        .codec()
        .verify_access(token)
        .map_err(|_| ApiError::InvalidToken)?;

    let user = find_user_for_auth(pool, claims.id, &claims.email)
        .await
        .map_err(|err| {
            error!("failed to resolve user principal: {err}");
            ApiError::Internal
        })?
        .ok_or(ApiError::InvalidToken)?;

    if !user.is_active() {
        return Err(ApiError::Deactivated);
    }

    let login_as = if claims.is_impersonated() {
        LoginAs::Admin
    } else {
        LoginAs::User
    };
    Ok(AuthedUser {
        user,
        login_as,
        admin_id: claims.admin_id,
    })
}

/// Resolve the request to an active admin or reject with 401.
pub async fn require_admin_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<AuthedAdmin, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(ApiError::NoToken);
    };
    let claims = state
        .codec()
        .verify_access(&token)
        .map_err(|_| ApiError::InvalidToken)?;

    let admin = find_admin_for_auth(pool, claims.id, &claims.email)
        .await
        .map_err(|err| {
            error!("failed to resolve admin principal: {err}");
            ApiError::Internal
        })?
        .ok_or(ApiError::InvalidToken)?;

    if !admin.is_active {
        return Err(ApiError::Deactivated);
    }
    Ok(AuthedAdmin { admin })
}

/// Try the admin collection first, fall back to users. Used by endpoints
/// shared across both principal kinds.
pub async fn require_common_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<CommonPrincipal, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(ApiError::NoToken);
    };
    let claims = state
        .codec()
        .verify_access(&token)
        .map_err(|_| ApiError::InvalidToken)?;

    let admin = find_admin_for_auth(pool, claims.id, &claims.email)
        .await
        .map_err(|err| {
            error!("failed to resolve admin principal: {err}");
            ApiError::Internal
        })?;
    if let Some(admin) = admin {
        if !admin.is_active {
            return Err(ApiError::Deactivated);
        }
        return Ok(CommonPrincipal::Admin(admin));
    }

    let user = find_user_for_auth(pool, claims.id, &claims.email)
        .await
        .map_err(|err| {
            error!("failed to resolve user principal: {err}");
            ApiError::Internal
        })?
        .ok_or(ApiError::InvalidToken)?;
    if !user.is_active() {
        return Err(ApiError::Deactivated);
    }
    Ok(CommonPrincipal::User(user))
}

/// Reject with 403 unless the admin's role is in the allow-list.
pub fn ensure_admin_role(
    admin: &AdminRecord,
    allow_list: &[AdminRole],
) -> Result<(), ApiError> {
    if admin.role.allowed(allow_list) {
        Ok(())
    } else {
        Err(ApiError::NotAuthorized)
    }
}

/// Permission gate for user endpoints reachable through impersonation: the
/// impersonating admin's role is re-fetched fresh from the store, so role
/// changes take effect without re-login. Direct user sessions pass.
pub async fn ensure_acting_admin_allowed(
    authed: &AuthedUser,
    allow_list: &[AdminRole],
    pool: &PgPool,
) -> Result<(), ApiError> {
    if authed.login_as != LoginAs::Admin {
        return Ok(());
    }
    let Some(admin_id) = authed.admin_id else {
        return Err(ApiError::NotAuthorized);
    };
    let role = fetch_admin_role(pool, admin_id)
        .await
        .map_err(|err| {
            error!("failed to fetch acting admin role: {err}");
            ApiError::Internal
        })?
        .ok_or(ApiError::NotAuthorized)?;

    if role.allowed(allow_list) {
        Ok(())
    } else {
        Err(ApiError::NotAuthorized)
    }
}

/// Guard for sensitive self-service mutations: an impersonating admin may
/// view but not mutate.
pub fn reject_impersonated(authed: &AuthedUser) -> Result<(), ApiError> {
    if authed.login_as == LoginAs::Admin {
        Err(ApiError::ImpersonationRestricted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::test_support::auth_state;
    use super::*;
    use axum::http::HeaderValue;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    fn admin(role: AdminRole) -> AdminRecord {
        AdminRecord {
            id: Uuid::new_v4(),
            name: "Ops".to_string(),
            email: "ops@donara.dev".to_string(),
            role,
            is_active: true,
        }
    }

    fn user_record() -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            first_name: Some("Dana".to_string()),
            last_name: None,
            email: "donor@example.com".to_string(),
            country_code: None,
            phone_number: None,
            status: "active".to_string(),
            is_email_verified: true,
            is_phone_verified: false,
            token_version: 0,
        }
    }

    #[test]
    fn extract_bearer_token_requires_nonempty_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("   "));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("Bearer abc".to_string()));
    }

    #[tokio::test]
    async fn missing_header_is_no_token() {
        let (state, _sink) = auth_state();
        let result = require_user_auth(&HeaderMap::new(), &lazy_pool(), &state).await;
        assert!(matches!(result, Err(ApiError::NoToken)));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_before_any_db_access() {
        let (state, _sink) = auth_state();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nonsense"));
        // The lazy pool has no live database; rejection must happen at
        // token verification.
        let result = require_user_auth(&headers, &lazy_pool(), &state).await;
        assert!(matches!(result, Err(ApiError::InvalidToken)));

        let result = require_admin_auth(&headers, &lazy_pool(), &state).await;
        assert!(matches!(result, Err(ApiError::InvalidToken)));

        let result = require_common_auth(&headers, &lazy_pool(), &state).await;
        assert!(matches!(result, Err(ApiError::InvalidToken)));
    }

    #[tokio::test]
    async fn optional_auth_passes_through_when_header_absent() {
        let (state, _sink) = auth_state();
        let result = optional_user_auth(&HeaderMap::new(), &lazy_pool(), &state).await;
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn role_gate_accepts_and_rejects() {
        let gate = [AdminRole::SuperAdmin];
        assert!(ensure_admin_role(&admin(AdminRole::SuperAdmin), &gate).is_ok());
        let result = ensure_admin_role(&admin(AdminRole::ReporterAdmin), &gate);
        assert!(matches!(result, Err(ApiError::NotAuthorized)));
    }

    #[test]
    fn impersonation_guard() {
        let direct = AuthedUser {
            user: user_record(),
            login_as: LoginAs::User,
            admin_id: None,
        };
        assert!(reject_impersonated(&direct).is_ok());

        let impersonated = AuthedUser {
            user: user_record(),
            login_as: LoginAs::Admin,
            admin_id: Some(Uuid::new_v4()),
        };
        let result = reject_impersonated(&impersonated);
        assert!(matches!(result, Err(ApiError::ImpersonationRestricted)));
    }

    #[tokio::test]
    async fn acting_admin_gate_passes_direct_sessions_without_db() {
        let direct = AuthedUser {
            user: user_record(),
            login_as: LoginAs::User,
            admin_id: None,
        };
        // Direct sessions short-circuit before the role fetch, so the lazy
        // pool is never touched.
        let result =
            ensure_acting_admin_allowed(&direct, &[AdminRole::SuperAdmin], &lazy_pool()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn impersonated_session_without_admin_id_is_rejected() {
        let broken = AuthedUser {
            user: user_record(),
            login_as: LoginAs::Admin,
            admin_id: None,
        };
        let result =
            ensure_acting_admin_allowed(&broken, &[AdminRole::SuperAdmin], &lazy_pool()).await;
        assert!(matches!(result, Err(ApiError::NotAuthorized)));
    }

    #[test]
    fn login_as_strings() {
        assert_eq!(LoginAs::User.as_str(), "user");
        assert_eq!(LoginAs::Admin.as_str(), "admin");
    }
}
