//! Email/password account endpoints: signup, login, refresh, logout,
//! profile, and password change.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::principal::{
    AuthedUser, ensure_acting_admin_allowed, reject_impersonated, require_user_auth,
};
use super::roles::AdminRole;
use super::state::AuthState;
use super::storage::{
    SignupOutcome, find_user_for_auth, find_user_login, insert_email_user, record_user_login,
    update_user_password,
};
use super::tokens::SessionIdentity;
use super::types::{ChangePasswordRequest, EmailSignupRequest, LoginRequest, RefreshTokenRequest};
use super::utils::{hash_password, normalize_email, valid_email, valid_password, verify_password};
use crate::api::audit::{ActionEntry, ActionKind, spawn_action_log};
use crate::api::response::{ApiError, ok};

fn profile_json(authed: &AuthedUser) -> serde_json::Value {
    json!({
        "_id": authed.user.id,
        "firstName": authed.user.first_name,
        "lastName": authed.user.last_name,
        "email": authed.user.email,
        "countryCode": authed.user.country_code,
        "phoneNumber": authed.user.phone_number,
        "status": authed.user.status,
        "isEmailVerified": authed.user.is_email_verified,
        "isPhoneVerified": authed.user.is_phone_verified,
        "loginAs": authed.login_as.as_str(),
        "adminId": authed.admin_id,
    })
}

/// Create an email/password account and mint a session pair.
#[utoipa::path(
    post,
    path = "/v1/user/email-signup",
    request_body = EmailSignupRequest,
    responses(
        (status = 200, description = "Account created"),
        (status = 400, description = "Validation failure"),
        (status = 409, description = "Duplicate email"),
    ),
    tag = "user-auth"
)]
pub async fn email_signup(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailSignupRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let first_name = request.first_name.trim();
    let last_name = request.last_name.trim();
    if first_name.is_empty() {
        return ApiError::Validation("First name is required".to_string()).into_response();
    }
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return ApiError::Validation("Email is required".to_string()).into_response();
    }
    if !valid_password(&request.password) {
        return ApiError::Validation(
            "Password must be at least 8 characters with upper and lower case letters, a digit, and a symbol."
                .to_string(),
        )
        .into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password: {err}");
            return ApiError::Internal.into_response();
        }
    };

    match insert_email_user(&pool, first_name, last_name, &email, &password_hash).await {
        Ok(SignupOutcome::Created { id }) => {
            let identity = SessionIdentity {
                id,
                email: email.clone(),
                impersonator: None,
                token_version: Some(0),
            };
            match auth_state.codec().issue_session(&identity) {
                Ok(tokens) => {
                    spawn_action_log(
                        auth_state.audit(),
                        ActionEntry::new(ActionKind::UserSignedUp, json!({"email": email}))
                            .user(id),
                    );
                    ok(json!({
                        "accessToken": tokens.access_token,
                        "refreshToken": tokens.refresh_token,
                    }))
                }
                Err(err) => {
                    error!("failed to issue session: {err}");
                    ApiError::Internal.into_response()
                }
            }
        }
        Ok(SignupOutcome::Conflict) => {
            ApiError::Conflict("An account with same email already exists".to_string())
                .into_response()
        }
        Err(err) => {
            error!("failed to create account: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Email/password login.
#[utoipa::path(
    post,
    path = "/v1/user/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued"),
        (status = 400, description = "Invalid credentials"),
        (status = 401, description = "Account deactivated"),
    ),
    tag = "user-auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return ApiError::BadCredentials.into_response();
    }

    let record = match find_user_login(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return ApiError::BadCredentials.into_response(),
        Err(err) => {
            error!("failed to lookup login record: {err}");
            return ApiError::Internal.into_response();
        }
    };

    // Deactivation wins over wrong-password so a blocked owner learns why.
    if record.status != "active" {
        return ApiError::Deactivated.into_response();
    }
    let password_ok = record
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !password_ok {
        return ApiError::BadCredentials.into_response();
    }

    let identity = SessionIdentity {
        id: record.id,
        email: record.email.clone(),
        impersonator: None,
        token_version: Some(record.token_version),
    };
    let tokens = match auth_state.codec().issue_session(&identity) {
        Ok(tokens) => tokens,
        Err(err) => {
            error!("failed to issue session: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Err(err) = record_user_login(&pool, record.id).await {
        error!("failed to record login time: {err}");
    }
    spawn_action_log(
        auth_state.audit(),
        ActionEntry::new(ActionKind::UserSignedIn, json!({"email": email})).user(record.id),
    );

    ok(json!({
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    }))
}

/// Rotate a refresh token into a fresh session pair.
///
/// The token version inside the refresh claims is checked against a fresh
/// fetch, so refresh tokens minted before a password change are dead even
/// though their signature and expiry still verify.
#[utoipa::path(
    post,
    path = "/v1/user/token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Session rotated"),
        (status = 401, description = "Invalid, expired, or revoked refresh token"),
    ),
    tag = "user-auth"
)]
pub async fn refresh_token(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let claims = match auth_state.codec().verify_refresh(&request.refresh_token) {
        Ok(claims) => claims,
        Err(_) => return ApiError::InvalidToken.into_response(),
    };

    let user = match find_user_for_auth(&pool, claims.id, &claims.email).await {
        Ok(Some(user)) => user,
        Ok(None) => return ApiError::InvalidToken.into_response(),
        Err(err) => {
            error!("failed to resolve user for refresh: {err}");
            return ApiError::Internal.into_response();
        }
    };
    if !user.is_active() {
        return ApiError::Deactivated.into_response();
    }
    if claims.ver != Some(user.token_version) {
        return ApiError::InvalidToken.into_response();
    }

    // Rotation carries impersonation metadata through unchanged.
    let identity = SessionIdentity {
        id: user.id,
        email: user.email.clone(),
        impersonator: claims.admin_id.filter(|_| claims.is_impersonated()),
        token_version: Some(user.token_version),
    };
    match auth_state.codec().issue_session(&identity) {
        Ok(tokens) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::UserRefreshToken, json!({})).user(user.id),
            );
            ok(json!({
                "accessToken": tokens.access_token,
                "refreshToken": tokens.refresh_token,
            }))
        }
        Err(err) => {
            error!("failed to issue session: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Log out. Sessions are stateless, so this only audits the event.
#[utoipa::path(
    post,
    path = "/v1/user/logout",
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "user-auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let authed = match require_user_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    // Logout is open to impersonated sessions from any admin role.
    if let Err(err) = ensure_acting_admin_allowed(&authed, &AdminRole::ALL, &pool).await {
        return err.into_response();
    }

    let mut entry =
        ActionEntry::new(ActionKind::UserLoggedOut, json!({})).user(authed.user.id);
    entry = entry.login_as(authed.login_as.as_str());
    if let Some(admin_id) = authed.admin_id {
        entry = entry.admin(admin_id);
    }
    spawn_action_log(auth_state.audit(), entry);

    ok(json!({}))
}

/// Current user profile. Readable through impersonated sessions.
#[utoipa::path(
    get,
    path = "/v1/user/profile",
    responses(
        (status = 200, description = "Profile projection"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "user-auth"
)]
pub async fn profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match require_user_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => ok(profile_json(&authed)),
        Err(err) => err.into_response(),
    }
}

/// Change the password of the authenticated user.
///
/// Rejected for impersonated sessions: an admin acting as a user may view
/// but not mutate the user's credentials. A successful change bumps the
/// token version, revoking all outstanding refresh tokens.
#[utoipa::path(
    put,
    path = "/v1/user/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Wrong current password or weak new password"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Impersonated session"),
    ),
    tag = "user-auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let authed = match require_user_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = reject_impersonated(&authed) {
        return err.into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    if !valid_password(&request.new_password) {
        return ApiError::Validation(
            "Password must be at least 8 characters with upper and lower case letters, a digit, and a symbol."
                .to_string(),
        )
        .into_response();
    }

    let record = match find_user_login(&pool, &authed.user.email).await {
        Ok(Some(record)) => record,
        Ok(None) => return ApiError::InvalidToken.into_response(),
        Err(err) => {
            error!("failed to lookup login record: {err}");
            return ApiError::Internal.into_response();
        }
    };
    let current_ok = record
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.current_password, hash));
    if !current_ok {
        return ApiError::BadCredentials.into_response();
    }

    let new_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password: {err}");
            return ApiError::Internal.into_response();
        }
    };
    match update_user_password(&pool, authed.user.id, &new_hash).await {
        Ok(true) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::UserUpdatedPassword, json!({}))
                    .user(authed.user.id),
            );
            ok(json!({}))
        }
        Ok(false) => ApiError::Internal.into_response(),
        Err(err) => {
            error!("failed to update password: {err}");
            ApiError::Internal.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::test_support::auth_state;
    use super::*;
    use axum::http::StatusCode;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn email_signup_missing_payload() {
        let (state, _sink) = auth_state();
        let response = email_signup(Extension(lazy_pool()), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn email_signup_rejects_weak_password() {
        let (state, _sink) = auth_state();
        let request = EmailSignupRequest {
            first_name: "Dana".to_string(),
            last_name: "Donor".to_string(),
            email: "a@b.com".to_string(),
            password: "password".to_string(),
        };
        let response = email_signup(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_rejects_malformed_email_without_db() {
        let (state, _sink) = auth_state();
        let request = LoginRequest {
            email: "not-an-email".to_string(),
            password: "Aa1!aaaa".to_string(),
        };
        let response = login(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_token() {
        let (state, _sink) = auth_state();
        let request = RefreshTokenRequest {
            refresh_token: "Bearer garbage".to_string(),
        };
        let response = refresh_token(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_rejects_access_token_in_refresh_slot() {
        let (state, _sink) = auth_state();
        let identity = super::super::tokens::SessionIdentity {
            id: uuid::Uuid::new_v4(),
            email: "donor@example.com".to_string(),
            impersonator: None,
            token_version: Some(0),
        };
        let tokens = state.codec().issue_session(&identity).expect("issue");
        let request = RefreshTokenRequest {
            refresh_token: tokens.access_token,
        };
        // Signed with the access secret: must die at signature verification,
        // before any principal lookup.
        let response = refresh_token(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_requires_token() {
        let (state, _sink) = auth_state();
        let response = logout(HeaderMap::new(), Extension(lazy_pool()), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_requires_token() {
        let (state, _sink) = auth_state();
        let response = profile(HeaderMap::new(), Extension(lazy_pool()), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
