//! Admin authentication, account management, and user impersonation.
//!
//! Admin login bodies may arrive encrypted; the configured
//! `PayloadDecryptor` runs before schema validation. Account management is
//! gated on the super-admin role, checked against the freshly resolved
//! principal rather than anything carried in the token.

use axum::{
    Json,
    extract::{Extension, Path},
    http::HeaderMap,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::principal::{
    CommonPrincipal, ensure_admin_role, require_admin_auth, require_common_auth,
};
use super::roles::AdminRole;
use super::state::AuthState;
use super::storage::{
    SignupOutcome, find_admin_login, find_user_identity, increment_users_disabled, insert_admin,
    record_admin_login, set_admin_status, set_user_status, update_admin_password,
};
use super::tokens::SessionIdentity;
use super::types::{
    CreateAdminRequest, LoginRequest, UpdateAdminPasswordRequest, UpdateAdminStatusRequest,
    UpdateUserStatusRequest,
};
use super::utils::{hash_password, normalize_email, valid_email, valid_password, verify_password};
use crate::api::audit::{ActionEntry, ActionKind, spawn_action_log};
use crate::api::response::{ApiError, ok};

/// Run the payload decryptor, then parse the plaintext as `LoginRequest`.
///
/// Encrypted bodies arrive as `{"data": "<ciphertext>"}`; plaintext bodies
/// are accepted as-is so development setups work without keys.
fn decode_login_body(
    state: &AuthState,
    body: &serde_json::Value,
) -> Result<LoginRequest, ApiError> {
    let plaintext = match body.get("data").and_then(serde_json::Value::as_str) {
        Some(ciphertext) => state.decryptor().decrypt(ciphertext).map_err(|err| {
            error!("failed to decrypt admin login payload: {err}");
            ApiError::Validation("Invalid payload".to_string())
        })?,
        None => body.to_string(),
    };
    serde_json::from_str(&plaintext)
        .map_err(|_| ApiError::Validation("Invalid payload".to_string()))
}

/// Admin email/password login. Returns an access token only.
#[utoipa::path(
    post,
    path = "/v1/admin/login",
    responses(
        (status = 200, description = "Access token issued"),
        (status = 400, description = "Invalid credentials"),
        (status = 401, description = "Account deactivated"),
    ),
    tag = "admin-auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<serde_json::Value>>,
) -> impl IntoResponse {
    let Some(Json(body)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let request = match decode_login_body(&auth_state, &body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return ApiError::BadCredentials.into_response();
    }

    let record = match find_admin_login(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return ApiError::BadCredentials.into_response(),
        Err(err) => {
            error!("failed to lookup admin login record: {err}");
            return ApiError::Internal.into_response();
        }
    };
    if !record.is_active {
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
        email: email.clone(),
        impersonator: None,
        token_version: None,
    };
    let access_token = match auth_state.codec().issue_access(&identity) {
        Ok(token) => token,
        Err(err) => {
            error!("failed to issue admin token: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Err(err) = record_admin_login(&pool, record.id).await {
        error!("failed to record admin login time: {err}");
    }
    spawn_action_log(
        auth_state.audit(),
        ActionEntry::new(ActionKind::AdminSignedIn, json!({})).admin(record.id),
    );

    ok(json!({"accessToken": access_token}))
}

/// Admin logout; sessions are stateless, so this only audits.
#[utoipa::path(
    post,
    path = "/v1/admin/logout",
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "admin-auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    spawn_action_log(
        auth_state.audit(),
        ActionEntry::new(ActionKind::AdminLoggedOut, json!({})).admin(authed.admin.id),
    );
    ok(json!({}))
}

/// Current admin profile.
#[utoipa::path(
    get,
    path = "/v1/admin/profile",
    responses(
        (status = 200, description = "Profile projection"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "admin-auth"
)]
pub async fn profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => ok(json!({
            "_id": authed.admin.id,
            "name": authed.admin.name,
            "email": authed.admin.email,
            "adminType": authed.admin.role,
            "isActive": authed.admin.is_active,
        })),
        Err(err) => err.into_response(),
    }
}

/// Create a new admin account (super-admin only).
#[utoipa::path(
    post,
    path = "/v1/admin/accounts",
    request_body = CreateAdminRequest,
    responses(
        (status = 200, description = "Admin created"),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Role not permitted"),
        (status = 409, description = "Duplicate email"),
    ),
    tag = "admin-accounts"
)]
pub async fn create_admin(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreateAdminRequest>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = ensure_admin_role(&authed.admin, &[AdminRole::SuperAdmin]) {
        return err.into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
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
    let name = request.name.trim();
    if name.is_empty() {
        return ApiError::Validation("Name is required".to_string()).into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let outcome = insert_admin(
        &pool,
        name,
        &email,
        request.phone_number.as_deref(),
        &password_hash,
        request.admin_type,
        authed.admin.id,
    )
    .await;

    match outcome {
        Ok(SignupOutcome::Created { id }) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::AdminAccountCreated, json!({"adminId": id}))
                    .admin(authed.admin.id),
            );
            ok(json!({}))
        }
        Ok(SignupOutcome::Conflict) => {
            ApiError::Conflict("An account with same email already exists".to_string())
                .into_response()
        }
        Err(err) => {
            error!("failed to create admin account: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Replace another admin's password (super-admin only).
#[utoipa::path(
    put,
    path = "/v1/admin/accounts/{admin_id}/password",
    request_body = UpdateAdminPasswordRequest,
    params(("admin_id" = Uuid, Path, description = "Target admin id")),
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Unknown admin or weak password"),
        (status = 403, description = "Role not permitted"),
    ),
    tag = "admin-accounts"
)]
pub async fn update_password(
    headers: HeaderMap,
    Path(admin_id): Path<Uuid>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateAdminPasswordRequest>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = ensure_admin_role(&authed.admin, &[AdminRole::SuperAdmin]) {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
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
    match update_admin_password(&pool, admin_id, &password_hash).await {
        Ok(true) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(
                    ActionKind::AdminAccountUpdated,
                    json!({"adminId": admin_id, "action": "password"}),
                )
                .admin(authed.admin.id),
            );
            ok(json!({}))
        }
        Ok(false) => ApiError::Validation("Invalid adminId".to_string()).into_response(),
        Err(err) => {
            error!("failed to update admin password: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Activate or deactivate an admin account (super-admin only).
#[utoipa::path(
    put,
    path = "/v1/admin/accounts/{admin_id}/status",
    request_body = UpdateAdminStatusRequest,
    params(("admin_id" = Uuid, Path, description = "Target admin id")),
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Unknown admin"),
        (status = 403, description = "Role not permitted"),
    ),
    tag = "admin-accounts"
)]
pub async fn update_status(
    headers: HeaderMap,
    Path(admin_id): Path<Uuid>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateAdminStatusRequest>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = ensure_admin_role(&authed.admin, &[AdminRole::SuperAdmin]) {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    match set_admin_status(&pool, admin_id, request.is_active).await {
        Ok(true) => {
            let action = if request.is_active {
                "status to active"
            } else {
                "status to in-active"
            };
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(
                    ActionKind::AdminAccountUpdated,
                    json!({"adminId": admin_id, "action": action}),
                )
                .admin(authed.admin.id),
            );
            ok(json!({}))
        }
        Ok(false) => ApiError::Validation("Invalid adminId".to_string()).into_response(),
        Err(err) => {
            error!("failed to update admin status: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Mint a user-scoped session for support purposes.
///
/// The pair is marked with `type = "admin"` and the caller's id, so the
/// impersonation guard can restrict sensitive user mutations downstream.
#[utoipa::path(
    get,
    path = "/v1/admin/users/{user_id}/login-token",
    params(("user_id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 200, description = "Impersonation session issued"),
        (status = 400, description = "Unknown user"),
        (status = 403, description = "Role not permitted"),
    ),
    tag = "admin-users"
)]
pub async fn user_login_token(
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = ensure_admin_role(
        &authed.admin,
        &[AdminRole::SuperAdmin, AdminRole::ApproverAdmin],
    ) {
        return err.into_response();
    }

    let (id, email, token_version) = match find_user_identity(&pool, user_id).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return ApiError::NotFound("User not found.".to_string()).into_response(),
        Err(err) => {
            error!("failed to lookup user for impersonation: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let identity = SessionIdentity {
        id,
        email,
        impersonator: Some(authed.admin.id),
        token_version: Some(token_version),
    };
    match auth_state.codec().issue_session(&identity) {
        Ok(tokens) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::AdminLoggedInAsUser, json!({}))
                    .user(user_id)
                    .admin(authed.admin.id),
            );
            ok(json!({
                "token": tokens.access_token,
                "refreshToken": tokens.refresh_token,
            }))
        }
        Err(err) => {
            error!("failed to issue impersonation session: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Activate or deactivate a user account (super-admin only).
#[utoipa::path(
    put,
    path = "/v1/admin/users/{user_id}/status",
    request_body = UpdateUserStatusRequest,
    params(("user_id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Unknown user or invalid status"),
        (status = 403, description = "Role not permitted"),
    ),
    tag = "admin-users"
)]
pub async fn update_user_status(
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateUserStatusRequest>>,
) -> impl IntoResponse {
    let authed = match require_admin_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = ensure_admin_role(&authed.admin, &[AdminRole::SuperAdmin]) {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    if request.status != "active" && request.status != "inactive" {
        return ApiError::Validation("Status must be active or inactive.".to_string())
            .into_response();
    }

    match set_user_status(&pool, user_id, &request.status).await {
        Ok(true) => {
            if request.status == "inactive" {
                if let Err(err) = increment_users_disabled(&pool, authed.admin.id).await {
                    error!("failed to increment users disabled count: {err}");
                }
            }
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(
                    ActionKind::AdminUserConfigUpdated,
                    json!({"status": request.status}),
                )
                .user(user_id)
                .admin(authed.admin.id),
            );
            ok(json!({}))
        }
        Ok(false) => ApiError::Validation("Invalid userId".to_string()).into_response(),
        Err(err) => {
            error!("failed to update user status: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Who am I, for either principal kind.
#[utoipa::path(
    get,
    path = "/v1/common/me",
    responses(
        (status = 200, description = "Principal projection"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "common"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match require_common_auth(&headers, &pool, &auth_state).await {
        Ok(CommonPrincipal::Admin(admin)) => ok(json!({
            "kind": "admin",
            "_id": admin.id,
            "name": admin.name,
            "email": admin.email,
            "adminType": admin.role,
        })),
        Ok(CommonPrincipal::User(user)) => ok(json!({
            "kind": "user",
            "_id": user.id,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "email": user.email,
        })),
        Err(err) => err.into_response(),
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

    #[test]
    fn decode_login_body_accepts_plaintext() {
        let (state, _sink) = auth_state();
        let body = json!({"email": "ops@donara.dev", "password": "Aa1!aaaa"});
        let request = decode_login_body(&state, &body).expect("decode");
        assert_eq!(request.email, "ops@donara.dev");
        assert_eq!(request.password, "Aa1!aaaa");
    }

    #[test]
    fn decode_login_body_runs_decryptor_on_data_field() {
        let (state, _sink) = auth_state();
        // With the passthrough decryptor the data field is plaintext JSON.
        let body = json!({"data": r#"{"email":"ops@donara.dev","password":"Aa1!aaaa"}"#});
        let request = decode_login_body(&state, &body).expect("decode");
        assert_eq!(request.email, "ops@donara.dev");
    }

    #[test]
    fn decode_login_body_rejects_garbage() {
        let (state, _sink) = auth_state();
        let body = json!({"data": "not json at all"});
        assert!(decode_login_body(&state, &body).is_err());

        let body = json!({"unexpected": true});
        assert!(decode_login_body(&state, &body).is_err());
    }

    #[tokio::test]
    async fn login_missing_payload() {
        let (state, _sink) = auth_state();
        let response = login(Extension(lazy_pool()), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_endpoints_require_token() {
        let (state, _sink) = auth_state();
        let response = logout(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(state.clone()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = profile(HeaderMap::new(), Extension(lazy_pool()), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_requires_token() {
        let (state, _sink) = auth_state();
        let response = me(HeaderMap::new(), Extension(lazy_pool()), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
