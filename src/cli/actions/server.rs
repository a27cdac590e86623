use crate::api;
use crate::api::handlers::auth::{AuthConfig, TokenCodec};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub frontend_base_url: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> anyhow::Result<()> {
    let codec = TokenCodec::new(
        &args.access_token_secret,
        &args.refresh_token_secret,
        args.access_token_ttl_seconds,
        args.refresh_token_ttl_seconds,
    );
    let config = AuthConfig::new()
        .with_frontend_base_url(args.frontend_base_url)
        .with_access_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds);

    api::new(args.port, args.dsn, config, codec).await
}
