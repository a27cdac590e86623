//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_ACCESS_SECRET, ARG_ACCESS_TTL, ARG_DSN, ARG_FRONTEND_BASE_URL, ARG_PORT,
    ARG_REFRESH_SECRET, ARG_REFRESH_TTL,
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let access_secret = matches
        .get_one::<String>(ARG_ACCESS_SECRET)
        .cloned()
        .context("missing required argument: --access-token-secret")?;
    let refresh_secret = matches
        .get_one::<String>(ARG_REFRESH_SECRET)
        .cloned()
        .context("missing required argument: --refresh-token-secret")?;

    // Independent secrets are the whole point of the two token classes; a
    // shared value would let either leaked key forge the other class.
    if access_secret == refresh_secret {
        return Err(anyhow!(
            "access and refresh token secrets must not be the same value"
        ));
    }

    let access_ttl = matches
        .get_one::<i64>(ARG_ACCESS_TTL)
        .copied()
        .unwrap_or(3600);
    let refresh_ttl = matches
        .get_one::<i64>(ARG_REFRESH_TTL)
        .copied()
        .unwrap_or(2_592_000);
    if access_ttl <= 0 || refresh_ttl <= 0 {
        return Err(anyhow!("token TTLs must be positive"));
    }

    let frontend_base_url = matches
        .get_one::<String>(ARG_FRONTEND_BASE_URL)
        .cloned()
        .unwrap_or_else(|| "https://donara.dev".to_string());

    Ok(Action::Server(Args {
        port,
        dsn,
        access_token_secret: SecretString::from(access_secret),
        refresh_token_secret: SecretString::from(refresh_secret),
        access_token_ttl_seconds: access_ttl,
        refresh_token_ttl_seconds: refresh_ttl,
        frontend_base_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_from(args: Vec<&str>) -> clap::ArgMatches {
        crate::cli::commands::new().get_matches_from(args)
    }

    #[test]
    fn handler_builds_server_action() {
        temp_env::with_vars(
            [
                ("DONARA_ACCESS_TOKEN_SECRET", None::<&str>),
                ("DONARA_REFRESH_TOKEN_SECRET", None::<&str>),
            ],
            || {
                let matches = matches_from(vec![
                    "donara",
                    "--dsn",
                    "postgres://localhost/donara",
                    "--access-token-secret",
                    "access",
                    "--refresh-token-secret",
                    "refresh",
                ]);
                let action = handler(&matches).expect("handler");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://localhost/donara");
                assert_eq!(args.access_token_ttl_seconds, 3600);
                assert_eq!(args.refresh_token_ttl_seconds, 2_592_000);
                assert_eq!(args.frontend_base_url, "https://donara.dev");
            },
        );
    }

    #[test]
    fn handler_rejects_shared_secret() {
        temp_env::with_vars(
            [
                ("DONARA_ACCESS_TOKEN_SECRET", None::<&str>),
                ("DONARA_REFRESH_TOKEN_SECRET", None::<&str>),
            ],
            || {
                let matches = matches_from(vec![
                    "donara",
                    "--dsn",
                    "postgres://localhost/donara",
                    "--access-token-secret",
                    "same",
                    "--refresh-token-secret",
                    "same",
                ]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("must not be the same value"));
                }
            },
        );
    }

    #[test]
    fn handler_rejects_non_positive_ttl() {
        temp_env::with_vars(
            [
                ("DONARA_ACCESS_TOKEN_SECRET", None::<&str>),
                ("DONARA_REFRESH_TOKEN_SECRET", None::<&str>),
            ],
            || {
                let matches = matches_from(vec![
                    "donara",
                    "--dsn",
                    "postgres://localhost/donara",
                    "--access-token-secret",
                    "access",
                    "--refresh-token-secret",
                    "refresh",
                    "--access-token-ttl-seconds",
                    "0",
                ]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
