//! Auth configuration and shared state.

use anyhow::Result;
use std::sync::Arc;

use super::tokens::TokenCodec;
use crate::api::audit::AuditSink;
use crate::api::notify::{MailSender, SmsSender};
use crate::api::rate_limit::RateLimiter;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_FRONTEND_BASE_URL: &str = "https://donara.dev";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frontend_base_url: DEFAULT_FRONTEND_BASE_URL.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: String) -> Self {
        self.frontend_base_url = url;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-processing hook for request bodies that may arrive encrypted
/// (admin login payloads). Core logic only ever sees plaintext JSON.
pub trait PayloadDecryptor: Send + Sync {
    /// Decrypt the raw body into plaintext JSON.
    ///
    /// # Errors
    /// Returns an error when the payload cannot be decrypted.
    fn decrypt(&self, body: &str) -> Result<String>;
}

/// Default decryptor for deployments that send plaintext JSON.
#[derive(Clone, Debug)]
pub struct PassthroughDecryptor;

impl PayloadDecryptor for PassthroughDecryptor {
    fn decrypt(&self, body: &str) -> Result<String> {
        Ok(body.to_string())
    }
}

/// Everything the auth handlers need beyond the connection pool.
pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    sms: Arc<dyn SmsSender>,
    mail: Arc<dyn MailSender>,
    decryptor: Arc<dyn PayloadDecryptor>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
        sms: Arc<dyn SmsSender>,
        mail: Arc<dyn MailSender>,
        decryptor: Arc<dyn PayloadDecryptor>,
    ) -> Self {
        Self {
            config,
            codec,
            rate_limiter,
            audit,
            sms,
            mail,
            decryptor,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    #[must_use]
    pub fn sms(&self) -> Arc<dyn SmsSender> {
        self.sms.clone()
    }

    #[must_use]
    pub fn mail(&self) -> Arc<dyn MailSender> {
        self.mail.clone()
    }

    #[must_use]
    pub fn decryptor(&self) -> &dyn PayloadDecryptor {
        self.decryptor.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::api::audit::test_support::RecordingSink;
    use crate::api::notify::{LogMailSender, LogSmsSender};
    use crate::api::rate_limit::NoopRateLimiter;
    use secrecy::SecretString;

    /// State wired with in-memory doubles for handler tests.
    pub fn auth_state() -> (Arc<AuthState>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let codec = TokenCodec::new(
            &SecretString::from("test-access-secret"),
            &SecretString::from("test-refresh-secret"),
            3600,
            86_400,
        );
        let state = Arc::new(AuthState::new(
            AuthConfig::new(),
            codec,
            Arc::new(NoopRateLimiter),
            sink.clone(),
            Arc::new(LogSmsSender),
            Arc::new(LogMailSender),
            Arc::new(PassthroughDecryptor),
        ));
        (state, sink)
    }
}
