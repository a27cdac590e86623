//! Uniform response envelope and the API error taxonomy.
//!
//! Every endpoint, including failures, answers with
//! `{"success": bool, "message": string, "data": object}` so clients never
//! branch on body shape. Errors map onto a closed taxonomy; anything
//! unexpected collapses into a generic 500 with no internal detail.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// The envelope every endpoint answers with.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

/// 200 with data and an empty message.
pub fn ok(data: Value) -> Response {
    reply(StatusCode::OK, true, "Success", data)
}

/// 200 with data and an explicit message.
pub fn ok_message(message: &str, data: Value) -> Response {
    reply(StatusCode::OK, true, message, data)
}

pub(crate) fn reply(status: StatusCode, success: bool, message: &str, data: Value) -> Response {
    let body = Envelope {
        success,
        message: message.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

/// Typed failure for every auth/account endpoint.
///
/// The `Display` text is the client-facing message; details that would leak
/// internals belong in the tracing/error log, never here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    /// Unknown credential target (email, phone, token owner).
    #[error("{0}")]
    NotFound(String),
    #[error("Verification code expired.")]
    Expired,
    #[error("Invalid verification code.")]
    Mismatch,
    #[error("Invalid credentials")]
    BadCredentials,
    /// Request arrived inside a cooldown window.
    #[error("{0}")]
    TooSoon(String),
    /// Missing bearer token.
    #[error("Access restricted")]
    NoToken,
    /// Malformed, forged, or expired token; or no matching principal.
    #[error("Invalid access")]
    InvalidToken,
    #[error("Your account has been deactivated by the admin. Please contact support.")]
    Deactivated,
    /// Role not in the allow-list for the operation.
    #[error("Not authorized.")]
    NotAuthorized,
    /// Impersonated session attempting a restricted self-service action.
    #[error("You are not allowed to perform this action")]
    ImpersonationRestricted,
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests. Please try again later.")]
    RateLimited,
    #[error("Error occurred. Please try again later.")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Expired
            | Self::Mismatch
            | Self::BadCredentials
            | Self::TooSoon(_) => StatusCode::BAD_REQUEST,
            Self::NoToken | Self::InvalidToken | Self::Deactivated => StatusCode::UNAUTHORIZED,
            Self::NotAuthorized | Self::ImpersonationRestricted => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        reply(self.status(), false, &self.to_string(), json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn ok_wraps_data_in_envelope() {
        let response = ok(json!({"id": 7}));
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["message"], json!("Success"));
        assert_eq!(body["data"]["id"], json!(7));
    }

    #[tokio::test]
    async fn errors_keep_the_envelope_shape() {
        let response = ApiError::Deactivated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["message"],
            json!("Your account has been deactivated by the admin. Please contact support.")
        );
        assert_eq!(body["data"], json!({}));
    }

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Expired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Mismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NoToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Deactivated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotAuthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::ImpersonationRestricted.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn messages_never_leak_internals() {
        assert_eq!(
            ApiError::Internal.to_string(),
            "Error occurred. Please try again later."
        );
        assert_eq!(ApiError::NoToken.to_string(), "Access restricted");
        assert_eq!(ApiError::InvalidToken.to_string(), "Invalid access");
    }
}
