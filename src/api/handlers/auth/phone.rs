//! Phone OTP login and signup endpoints.
//!
//! First contact from an unseen phone number creates a pending account that
//! holds only the code and device metadata; the account becomes a real user
//! when signup consumes the code. Existing users get their code overwritten
//! in place, so there is a single live code per phone number at all times.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use regex::Regex;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::storage::{
    CodeOutcome, PendingCodeOutcome, PromoteOutcome, check_temp_account_code,
    consume_user_phone_code, email_in_use, find_user_by_phone, load_verification_config,
    promote_temp_account, set_user_phone_code, upsert_temp_account,
};
use super::tokens::SessionIdentity;
use super::types::{PhoneSignupRequest, SendLoginCodeRequest, VerifyLoginCodeRequest};
use super::utils::{
    extract_client_ip, generate_phone_code, normalize_email, valid_country_code,
    valid_device_type, valid_email, valid_phone_number,
};
use crate::api::audit::{ActionEntry, ActionKind, ErrorEntry, spawn_action_log, spawn_error_log};
use crate::api::notify::{SmsMessage, spawn_sms};
use crate::api::response::{ApiError, ok};

fn validate_phone_fields(
    country_code: &str,
    phone_number: &str,
    device_type: Option<&str>,
) -> Result<(), ApiError> {
    if !valid_country_code(country_code) {
        return Err(ApiError::Validation(
            "Country code must start with \"+\" followed by 1-4 digits.".to_string(),
        ));
    }
    if !valid_phone_number(phone_number) {
        return Err(ApiError::Validation(
            "Phone number must contain 7-15 digits.".to_string(),
        ));
    }
    if let Some(device_type) = device_type {
        if !device_type.is_empty() && !valid_device_type(device_type) {
            return Err(ApiError::Validation(
                "Device type must be android or ios.".to_string(),
            ));
        }
    }
    Ok(())
}

fn report_error(state: &AuthState, headers: &HeaderMap, endpoint: &str, details: String) {
    spawn_error_log(
        state.audit(),
        ErrorEntry {
            endpoint: endpoint.to_string(),
            params: json!({}),
            details,
            user_id: None,
            admin_id: None,
            ip_address: extract_client_ip(headers),
        },
    );
}

/// Send a 4-digit login code to a phone number.
#[utoipa::path(
    post,
    path = "/v1/user/send-login-code",
    request_body = SendLoginCodeRequest,
    responses(
        (status = 200, description = "Code generated and sent"),
        (status = 400, description = "Validation failure"),
    ),
    tag = "user-auth"
)]
pub async fn send_login_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendLoginCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    if let Err(err) = validate_phone_fields(
        &request.country_code,
        &request.phone_number,
        request.device_type.as_deref(),
    ) {
        return err.into_response();
    }

    let config = match load_verification_config(&pool).await {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load verification config: {err}");
            report_error(&auth_state, &headers, "/v1/user/send-login-code", err.to_string());
            return ApiError::Internal.into_response();
        }
    };

    let code = match generate_phone_code() {
        Ok(code) => code,
        Err(err) => {
            error!("failed to generate login code: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let existing = match find_user_by_phone(&pool, &request.country_code, &request.phone_number)
        .await
    {
        Ok(existing) => existing,
        Err(err) => {
            error!("failed to lookup phone number: {err}");
            report_error(&auth_state, &headers, "/v1/user/send-login-code", err.to_string());
            return ApiError::Internal.into_response();
        }
    };

    let stored = match existing {
        Some(user_id) => {
            set_user_phone_code(
                &pool,
                user_id,
                &code,
                config.phone_verification_expiry_minutes,
                request.device_type.as_deref(),
                request.device_token.as_deref(),
            )
            .await
        }
        None => {
            upsert_temp_account(
                &pool,
                &request.country_code,
                &request.phone_number,
                &code,
                config.phone_verification_expiry_minutes,
                request.device_type.as_deref(),
                request.device_token.as_deref(),
            )
            .await
        }
    };
    if let Err(err) = stored {
        error!("failed to store login code: {err}");
        report_error(&auth_state, &headers, "/v1/user/send-login-code", err.to_string());
        return ApiError::Internal.into_response();
    }

    spawn_sms(
        auth_state.sms(),
        SmsMessage {
            country_code: request.country_code.clone(),
            phone_number: request.phone_number.clone(),
            body: format!("Your verification code is: {code}"),
        },
    );
    spawn_action_log(
        auth_state.audit(),
        ActionEntry::new(
            ActionKind::UserSendLoginCode,
            json!({
                "countryCode": request.country_code,
                "phoneNumber": request.phone_number,
                "deviceType": request.device_type,
                "deviceToken": request.device_token,
            }),
        ),
    );

    ok(json!({}))
}

/// Verify a login code. Existing users get a session pair; unseen numbers
/// get `isNewUser = true` and must complete signup to receive tokens.
#[utoipa::path(
    post,
    path = "/v1/user/verify-login-code",
    request_body = VerifyLoginCodeRequest,
    responses(
        (status = 200, description = "Code accepted"),
        (status = 400, description = "Unknown number, wrong code, or expired code"),
    ),
    tag = "user-auth"
)]
pub async fn verify_login_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyLoginCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    if let Err(err) = validate_phone_fields(
        &request.country_code,
        &request.phone_number,
        request.device_type.as_deref(),
    ) {
        return err.into_response();
    }
    let code = request.code.trim();
    if code.is_empty() {
        return ApiError::Validation("Verification code is required".to_string()).into_response();
    }

    let existing = match find_user_by_phone(&pool, &request.country_code, &request.phone_number)
        .await
    {
        Ok(existing) => existing,
        Err(err) => {
            error!("failed to lookup phone number: {err}");
            report_error(&auth_state, &headers, "/v1/user/verify-login-code", err.to_string());
            return ApiError::Internal.into_response();
        }
    };

    let response = if existing.is_some() {
        // Verification gates the login itself, so the code is consumed here.
        let outcome =
            consume_user_phone_code(&pool, &request.country_code, &request.phone_number, code)
                .await;
        match outcome {
            Ok(CodeOutcome::Consumed {
                id,
                email,
                token_version,
            }) => {
                let identity = SessionIdentity {
                    id,
                    email,
                    impersonator: None,
                    token_version: Some(token_version),
                };
                match auth_state.codec().issue_session(&identity) {
                    Ok(tokens) => {
                        spawn_action_log(
                            auth_state.audit(),
                            ActionEntry::new(
                                ActionKind::UserVerifyLoginCode,
                                json!({
                                    "countryCode": request.country_code,
                                    "phoneNumber": request.phone_number,
                                }),
                            )
                            .user(id),
                        );
                        ok(json!({
                            "isNewUser": false,
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
            Ok(CodeOutcome::NotFound) => {
                ApiError::NotFound("Phone number not registered.".to_string()).into_response()
            }
            Ok(CodeOutcome::Mismatch) => ApiError::Mismatch.into_response(),
            Ok(CodeOutcome::Expired) => ApiError::Expired.into_response(),
            Err(err) => {
                error!("failed to verify login code: {err}");
                report_error(&auth_state, &headers, "/v1/user/verify-login-code", err.to_string());
                ApiError::Internal.into_response()
            }
        }
    } else {
        // Pending accounts keep their code live: signup consumes it when it
        // promotes the account.
        let outcome =
            check_temp_account_code(&pool, &request.country_code, &request.phone_number, code)
                .await;
        match outcome {
            Ok(PendingCodeOutcome::Valid) => {
                spawn_action_log(
                    auth_state.audit(),
                    ActionEntry::new(
                        ActionKind::UserVerifyLoginCode,
                        json!({
                            "countryCode": request.country_code,
                            "phoneNumber": request.phone_number,
                        }),
                    ),
                );
                ok(json!({
                    "isNewUser": true,
                    "accessToken": null,
                    "refreshToken": null,
                }))
            }
            Ok(PendingCodeOutcome::NotFound) => {
                ApiError::NotFound("Phone number not registered.".to_string()).into_response()
            }
            Ok(PendingCodeOutcome::Mismatch) => ApiError::Mismatch.into_response(),
            Ok(PendingCodeOutcome::Expired) => ApiError::Expired.into_response(),
            Err(err) => {
                error!("failed to verify login code: {err}");
                report_error(&auth_state, &headers, "/v1/user/verify-login-code", err.to_string());
                ApiError::Internal.into_response()
            }
        }
    };

    response
}

/// Complete a phone signup: consume the pending account and mint a session.
#[utoipa::path(
    post,
    path = "/v1/user/signup",
    request_body = PhoneSignupRequest,
    responses(
        (status = 200, description = "Account created"),
        (status = 400, description = "Validation or code failure"),
        (status = 409, description = "Duplicate email or phone number"),
    ),
    tag = "user-auth"
)]
pub async fn phone_signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PhoneSignupRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };
    if let Err(err) = validate_phone_fields(&request.country_code, &request.phone_number, None) {
        return err.into_response();
    }
    let code = request.code.trim();
    if code.is_empty() {
        return ApiError::Validation("Verification code is required".to_string()).into_response();
    }
    let name = request.name.trim();
    if !Regex::new(r"^[a-zA-Z\s\-']{3,50}$").is_ok_and(|regex| regex.is_match(name)) {
        return ApiError::Validation("Name must contain 3-50 characters.".to_string())
            .into_response();
    }
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return ApiError::Validation("Email is required".to_string()).into_response();
    }

    match email_in_use(&pool, &email).await {
        Ok(true) => {
            return ApiError::Conflict("An account with same email already exists".to_string())
                .into_response();
        }
        Ok(false) => {}
        Err(err) => {
            error!("failed to check email usage: {err}");
            report_error(&auth_state, &headers, "/v1/user/signup", err.to_string());
            return ApiError::Internal.into_response();
        }
    }

    // Split the name the way the profile stores it: first word + remainder.
    let mut parts = name.splitn(2, char::is_whitespace);
    let first_name = parts.next().unwrap_or(name);
    let last_name = parts.next().map(str::trim).filter(|part| !part.is_empty());

    let outcome = promote_temp_account(
        &pool,
        &request.country_code,
        &request.phone_number,
        code,
        first_name,
        last_name,
        &email,
        request.referral_code.as_deref(),
    )
    .await;

    match outcome {
        Ok(PromoteOutcome::Created { id }) => {
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
                        ActionEntry::new(
                            ActionKind::UserSignedUp,
                            json!({
                                "countryCode": request.country_code,
                                "phoneNumber": request.phone_number,
                                "email": email,
                            }),
                        )
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
        Ok(PromoteOutcome::Conflict) => ApiError::Conflict(
            "An account with same email or phone number already exists".to_string(),
        )
        .into_response(),
        Ok(PromoteOutcome::CodeNotFound) => {
            ApiError::NotFound("Phone number not registered.".to_string()).into_response()
        }
        Ok(PromoteOutcome::CodeMismatch) => ApiError::Mismatch.into_response(),
        Ok(PromoteOutcome::CodeExpired) => ApiError::Expired.into_response(),
        Err(err) => {
            error!("failed to promote pending account: {err}");
            report_error(&auth_state, &headers, "/v1/user/signup", err.to_string());
            ApiError::Internal.into_response()
        }
    }
}
