use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::{MatchedPath, Request},
    http::{
        HeaderName, HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod audit;
pub mod handlers;
pub mod notify;
pub mod rate_limit;
pub mod response;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

use audit::PgAuditSink;
use handlers::auth::{AuthConfig, AuthState, PassthroughDecryptor, TokenCodec};
use handlers::{auth, root};
use notify::{LogMailSender, LogSmsSender};
use rate_limit::{RateLimitDecision, SlidingWindowLimiter};
use response::{ApiError, reply};

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database connection or the listener fails.
pub async fn new(port: u16, dsn: String, config: AuthConfig, codec: TokenCodec) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let auth_state = Arc::new(AuthState::new(
        config,
        codec,
        Arc::new(SlidingWindowLimiter::new()),
        Arc::new(PgAuditSink::new(pool.clone())),
        Arc::new(LogSmsSender),
        Arc::new(LogMailSender),
        Arc::new(PassthroughDecryptor),
    ));

    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with
    // non-doc routes like `/` and the enveloped 404 fallback. The rate-limit
    // middleware sits after the extension layers so it can reach the shared
    // limiter, but still runs before any route handler.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone()))
                .layer(middleware::from_fn(rate_limit_middleware)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Coarse abuse guard in front of every route, keyed by client IP.
async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let state = request.extensions().get::<Arc<AuthState>>().cloned();
    if let Some(state) = state {
        let key = auth::principal_rate_key(request.headers());
        if state.rate_limiter().check(&key) == RateLimitDecision::Limited {
            return ApiError::RateLimited.into_response();
        }
    }
    next.run(request).await
}

async fn not_found() -> Response {
    reply(
        axum::http::StatusCode::NOT_FOUND,
        false,
        "Resource not found.",
        json!({}),
    )
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() {
        let origin = frontend_origin("https://donara.dev/app/").expect("origin");
        assert_eq!(origin, HeaderValue::from_static("https://donara.dev"));

        let origin = frontend_origin("http://localhost:5173").expect("origin");
        assert_eq!(origin, HeaderValue::from_static("http://localhost:5173"));
    }

    #[test]
    fn frontend_origin_rejects_garbage() {
        assert!(frontend_origin("not a url").is_err());
    }

    #[tokio::test]
    async fn not_found_is_enveloped() {
        let response = not_found().await;
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
