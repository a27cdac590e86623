//! Password recovery and email verification token flows.
//!
//! Both flows issue a 32-byte random token whose hash is stored on the
//! user row; issuing again overwrites the previous hash, so at most one
//! token of each kind is live per principal. Consumption happens in the
//! same statement as the state change it gates, which makes a second use
//! of the same token match nothing.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::principal::require_user_auth;
use super::state::AuthState;
use super::storage::{
    IssueOutcome, consume_email_verification, consume_password_recovery,
    issue_email_verification, issue_password_recovery, load_verification_config,
};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest, VerifyEmailRequest};
use super::utils::{
    build_recovery_url, build_verify_url, generate_recovery_token, hash_recovery_token,
    normalize_email, valid_email, valid_password,
};
use crate::api::audit::{ActionEntry, ActionKind, spawn_action_log};
use crate::api::notify::{EmailMessage, spawn_email};
use crate::api::response::{ApiError, ok};

/// Start password recovery for an email address.
#[utoipa::path(
    post,
    path = "/v1/user/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Recovery email queued"),
        (status = 400, description = "Unknown email or cooldown active"),
    ),
    tag = "user-auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return ApiError::Validation("Email is required".to_string()).into_response();
    }

    let config = match load_verification_config(&pool).await {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load verification config: {err}");
            return ApiError::Internal.into_response();
        }
    };
    let token = match generate_recovery_token() {
        Ok(token) => token,
        Err(err) => {
            error!("failed to generate recovery token: {err}");
            return ApiError::Internal.into_response();
        }
    };
    let token_hash = hash_recovery_token(&token);

    let outcome = issue_password_recovery(
        &pool,
        &email,
        &token_hash,
        config.password_recovery_expiry_minutes,
        config.password_recovery_interval_secs,
    )
    .await;

    match outcome {
        Ok(IssueOutcome::Issued) => {
            let recovery_url = build_recovery_url(auth_state.config().frontend_base_url(), &token);
            let payload_json = json!({"email": email, "recovery_url": recovery_url}).to_string();
            spawn_email(
                auth_state.mail(),
                EmailMessage {
                    to_email: email.clone(),
                    template: "password_recovery".to_string(),
                    payload_json,
                },
            );
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::UserForgotPassword, json!({"email": email})),
            );
            ok(json!({}))
        }
        Ok(IssueOutcome::Cooldown) => ApiError::TooSoon(
            "A recovery email was sent recently. Please wait before requesting another."
                .to_string(),
        )
        .into_response(),
        Ok(IssueOutcome::NotFound) => {
            ApiError::NotFound("Email address not registered.".to_string()).into_response()
        }
        Err(err) => {
            error!("failed to issue recovery token: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Consume a recovery token and set the new password.
#[utoipa::path(
    post,
    path = "/v1/user/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Invalid, expired, or already-used token"),
    ),
    tag = "user-auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let token = request.token.trim();
    if token.is_empty() {
        return ApiError::Validation("Missing token".to_string()).into_response();
    }
    if !valid_password(&request.password) {
        return ApiError::Validation(
            "Password must be at least 8 characters with upper and lower case letters, a digit, and a symbol."
                .to_string(),
        )
        .into_response();
    }

    let new_hash = match super::utils::hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let token_hash = hash_recovery_token(token);
    match consume_password_recovery(&pool, &token_hash, &new_hash).await {
        Ok(Some(user_id)) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::UserResetPassword, json!({})).user(user_id),
            );
            ok(json!({}))
        }
        // Exact-match lookup failed: unknown, expired, or already consumed.
        Ok(None) => {
            ApiError::NotFound("Invalid or expired recovery token.".to_string()).into_response()
        }
        Err(err) => {
            error!("failed to reset password: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Send (or resend) the email verification link for the current user.
#[utoipa::path(
    post,
    path = "/v1/user/send-email-verification",
    responses(
        (status = 200, description = "Verification email queued"),
        (status = 400, description = "Cooldown active or already verified"),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "user-auth"
)]
pub async fn send_email_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let authed = match require_user_auth(&headers, &pool, &auth_state).await {
        Ok(authed) => authed,
        Err(err) => return err.into_response(),
    };
    if authed.user.is_email_verified {
        return ApiError::Validation("Email address is already verified.".to_string())
            .into_response();
    }

    let config = match load_verification_config(&pool).await {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load verification config: {err}");
            return ApiError::Internal.into_response();
        }
    };
    let token = match generate_recovery_token() {
        Ok(token) => token,
        Err(err) => {
            error!("failed to generate verification token: {err}");
            return ApiError::Internal.into_response();
        }
    };
    let token_hash = hash_recovery_token(&token);

    let outcome = issue_email_verification(
        &pool,
        authed.user.id,
        &token_hash,
        config.email_verification_expiry_minutes,
        config.email_verification_interval_secs,
    )
    .await;

    match outcome {
        Ok(IssueOutcome::Issued) => {
            let verify_url = build_verify_url(auth_state.config().frontend_base_url(), &token);
            let payload_json =
                json!({"email": authed.user.email, "verify_url": verify_url}).to_string();
            spawn_email(
                auth_state.mail(),
                EmailMessage {
                    to_email: authed.user.email.clone(),
                    template: "verify_email".to_string(),
                    payload_json,
                },
            );
            ok(json!({}))
        }
        Ok(IssueOutcome::Cooldown | IssueOutcome::NotFound) => ApiError::TooSoon(
            "A verification email was sent recently. Please wait before requesting another."
                .to_string(),
        )
        .into_response(),
        Err(err) => {
            error!("failed to issue verification token: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Consume an email verification token.
#[utoipa::path(
    post,
    path = "/v1/user/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified"),
        (status = 400, description = "Invalid, expired, or already-used token"),
    ),
    tag = "user-auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    let token = request.token.trim();
    if token.is_empty() {
        return ApiError::Validation("Missing token".to_string()).into_response();
    }

    let token_hash = hash_recovery_token(token);
    match consume_email_verification(&pool, &token_hash).await {
        Ok(Some(user_id)) => {
            spawn_action_log(
                auth_state.audit(),
                ActionEntry::new(ActionKind::UserEmailVerified, json!({})).user(user_id),
            );
            ok(json!({}))
        }
        Ok(None) => {
            ApiError::NotFound("Invalid or expired verification token.".to_string())
                .into_response()
        }
        Err(err) => {
            error!("failed to verify email: {err}");
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
    async fn forgot_password_missing_payload() {
        let (state, _sink) = auth_state();
        let response = forgot_password(Extension(lazy_pool()), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forgot_password_rejects_bad_email() {
        let (state, _sink) = auth_state();
        let request = ForgotPasswordRequest {
            email: "not-an-email".to_string(),
        };
        let response =
            forgot_password(Extension(lazy_pool()), Extension(state), Some(Json(request)))
                .await
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_password_requires_token_and_strong_password() {
        let (state, _sink) = auth_state();
        let request = ResetPasswordRequest {
            token: "  ".to_string(),
            password: "Aa1!aaaa".to_string(),
        };
        let response = reset_password(
            Extension(lazy_pool()),
            Extension(state.clone()),
            Some(Json(request)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = ResetPasswordRequest {
            token: "some-token".to_string(),
            password: "weak".to_string(),
        };
        let response = reset_password(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_email_requires_token() {
        let (state, _sink) = auth_state();
        let request = VerifyEmailRequest {
            token: " ".to_string(),
        };
        let response = verify_email(Extension(lazy_pool()), Extension(state), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_email_verification_requires_auth() {
        let (state, _sink) = auth_state();
        let response =
            send_email_verification(HeaderMap::new(), Extension(lazy_pool()), Extension(state))
                .await
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
