//! Small helpers for input validation, code/token generation, and password
//! hashing.

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Country code: `+` followed by 1-4 digits.
pub(crate) fn valid_country_code(country_code: &str) -> bool {
    Regex::new(r"^\+\d{1,4}$").is_ok_and(|regex| regex.is_match(country_code))
}

/// National number: 7-15 digits, no separators.
pub(crate) fn valid_phone_number(phone_number: &str) -> bool {
    Regex::new(r"^\d{7,15}$").is_ok_and(|regex| regex.is_match(phone_number))
}

/// Password policy: at least 8 characters with a lowercase letter, an
/// uppercase letter, a digit, and a symbol. Checked by scanning because the
/// regex engine has no lookahead.
pub(crate) fn valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_ascii_alphanumeric())
}

pub(crate) fn valid_device_type(device_type: &str) -> bool {
    device_type == "android" || device_type == "ios"
}

/// 4-digit numeric one-time code for phone verification.
///
/// # Errors
/// Returns an error if the system RNG is unavailable.
pub(crate) fn generate_phone_code() -> Result<String> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate phone verification code")?;
    let value = u32::from_le_bytes(bytes) % 10_000;
    Ok(format!("{value:04}"))
}

/// Opaque token for email verification and password recovery links.
/// The raw value goes out to the user; only a hash is stored.
///
/// # Errors
/// Returns an error if the system RNG is unavailable.
pub(crate) fn generate_recovery_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate recovery token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a recovery/verification token so raw values never touch the database.
pub(crate) fn hash_recovery_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Argon2id password hash in PHC string format.
///
/// # Errors
/// Returns an error if hashing fails.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))
}

/// Constant-time-ish password check against a stored PHC hash. A malformed
/// stored hash counts as a mismatch, not an error the caller must branch on.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Build the frontend recovery link included in outbound emails.
pub(crate) fn build_recovery_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}

/// Build the frontend email verification link.
pub(crate) fn build_verify_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/verify-email#token={token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn country_code_format() {
        assert!(valid_country_code("+1"));
        assert!(valid_country_code("+971"));
        assert!(valid_country_code("+1234"));
        assert!(!valid_country_code("1"));
        assert!(!valid_country_code("+"));
        assert!(!valid_country_code("+12345"));
        assert!(!valid_country_code("+1a"));
    }

    #[test]
    fn phone_number_format() {
        assert!(valid_phone_number("5551234"));
        assert!(valid_phone_number("5551234567"));
        assert!(valid_phone_number("555123456789012"));
        assert!(!valid_phone_number("555123"));
        assert!(!valid_phone_number("5551234567890123"));
        assert!(!valid_phone_number("555-1234"));
    }

    #[test]
    fn password_policy() {
        assert!(valid_password("Aa1!aaaa"));
        assert!(valid_password("Str0ng&Passw0rd"));
        assert!(!valid_password("Aa1!aaa")); // too short
        assert!(!valid_password("aa1!aaaa")); // no uppercase
        assert!(!valid_password("AA1!AAAA")); // no lowercase
        assert!(!valid_password("Aaa!aaaa")); // no digit
        assert!(!valid_password("Aa1aaaaa")); // no symbol
    }

    #[test]
    fn device_types() {
        assert!(valid_device_type("android"));
        assert!(valid_device_type("ios"));
        assert!(!valid_device_type("web"));
        assert!(!valid_device_type(""));
    }

    #[test]
    fn phone_code_is_four_digits() {
        for _ in 0..32 {
            let code = generate_phone_code().expect("code");
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn recovery_token_round_trip() {
        let decoded_len = generate_recovery_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_recovery_token_stable() {
        let first = hash_recovery_token("token");
        let second = hash_recovery_token("token");
        let different = hash_recovery_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("Aa1!aaaa").expect("hash");
        assert!(verify_password("Aa1!aaaa", &hash));
        assert!(!verify_password("Aa1!aaab", &hash));
        assert!(!verify_password("Aa1!aaaa", "not-a-phc-string"));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn recovery_urls_trim_trailing_slash() {
        assert_eq!(
            build_recovery_url("https://donara.dev/", "tok"),
            "https://donara.dev/reset-password#token=tok"
        );
        assert_eq!(
            build_verify_url("https://donara.dev", "tok"),
            "https://donara.dev/verify-email#token=tok"
        );
    }
}
