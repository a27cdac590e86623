//! Append-only action and error audit log.
//!
//! Every state-changing auth flow records an action entry, and every caught
//! error records an error entry. Writes are fire-and-forget: they run on a
//! spawned task, failures are logged and dropped, and the primary operation
//! never waits on or fails because of the audit trail.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{Instrument, error};
use uuid::Uuid;

/// Closed set of audited actions. The string form is the stored `log_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    UserSendLoginCode,
    UserVerifyLoginCode,
    UserSignedUp,
    UserSignedIn,
    UserRefreshToken,
    UserLoggedOut,
    UserForgotPassword,
    UserResetPassword,
    UserUpdatedPassword,
    UserEmailVerified,
    UserPhoneVerified,
    AdminSignedIn,
    AdminLoggedOut,
    AdminAccountCreated,
    AdminAccountUpdated,
    AdminLoggedInAsUser,
    AdminUserConfigUpdated,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserSendLoginCode => "user-send-login-code",
            Self::UserVerifyLoginCode => "user-verify-login-code",
            Self::UserSignedUp => "user-signed-up",
            Self::UserSignedIn => "user-signed-in",
            Self::UserRefreshToken => "user-refresh-token",
            Self::UserLoggedOut => "user-logged-out",
            Self::UserForgotPassword => "user-forgot-password",
            Self::UserResetPassword => "user-reset-password",
            Self::UserUpdatedPassword => "user-updated-password",
            Self::UserEmailVerified => "user-email-address-verified",
            Self::UserPhoneVerified => "user-phone-number-verified",
            Self::AdminSignedIn => "admin-signed-in",
            Self::AdminLoggedOut => "admin-logged-out",
            Self::AdminAccountCreated => "admin-account-created",
            Self::AdminAccountUpdated => "admin-account-updated",
            Self::AdminLoggedInAsUser => "admin-logged-in-as-a-user",
            Self::AdminUserConfigUpdated => "admin-user-config-updated",
        }
    }
}

/// One security-relevant event.
#[derive(Clone, Debug)]
pub struct ActionEntry {
    pub kind: ActionKind,
    pub details: Value,
    pub user_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    /// `"admin"` when the acting session was an impersonation.
    pub login_as: Option<String>,
}

impl ActionEntry {
    #[must_use]
    pub fn new(kind: ActionKind, details: Value) -> Self {
        Self {
            kind,
            details,
            user_id: None,
            admin_id: None,
            login_as: None,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn admin(mut self, admin_id: Uuid) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    #[must_use]
    pub fn login_as(mut self, login_as: &str) -> Self {
        self.login_as = Some(login_as.to_string());
        self
    }
}

/// One caught error, with enough request context to debug it later.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub endpoint: String,
    pub params: Value,
    pub details: String,
    pub user_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

/// Destination for audit writes. Pluggable so tests can observe the
/// fire-and-forget path without a database.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_action(&self, entry: ActionEntry) -> Result<()>;
    async fn record_error(&self, entry: ErrorEntry) -> Result<()>;
}

/// Production sink: inserts into `action_logs` / `error_logs`.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record_action(&self, entry: ActionEntry) -> Result<()> {
        let query = r"
            INSERT INTO action_logs (log_type, details, user_id, admin_id, login_as)
            VALUES ($1, $2::jsonb, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let details =
            serde_json::to_string(&entry.details).context("failed to serialize action details")?;
        sqlx::query(query)
            .bind(entry.kind.as_str())
            .bind(details)
            .bind(entry.user_id)
            .bind(entry.admin_id)
            .bind(entry.login_as)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert action log")?;
        Ok(())
    }

    async fn record_error(&self, entry: ErrorEntry) -> Result<()> {
        let query = r"
            INSERT INTO error_logs (endpoint, params, details, user_id, admin_id, ip_address)
            VALUES ($1, $2::jsonb, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let params =
            serde_json::to_string(&entry.params).context("failed to serialize error params")?;
        sqlx::query(query)
            .bind(entry.endpoint)
            .bind(params)
            .bind(entry.details)
            .bind(entry.user_id)
            .bind(entry.admin_id)
            .bind(entry.ip_address)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert error log")?;
        Ok(())
    }
}

/// Record an action without blocking or failing the caller.
pub fn spawn_action_log(sink: Arc<dyn AuditSink>, entry: ActionEntry) {
    tokio::spawn(async move {
        let kind = entry.kind;
        if let Err(err) = sink.record_action(entry).await {
            error!("failed to record action log {}: {err}", kind.as_str());
        }
    });
}

/// Record an error without blocking or failing the caller.
pub fn spawn_error_log(sink: Arc<dyn AuditSink>, entry: ErrorEntry) {
    tokio::spawn(async move {
        let endpoint = entry.endpoint.clone();
        if let Err(err) = sink.record_error(entry).await {
            error!("failed to record error log for {endpoint}: {err}");
        }
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// Captures entries in memory so tests can assert on audit behavior.
    #[derive(Default)]
    pub struct RecordingSink {
        pub actions: Mutex<Vec<ActionEntry>>,
        pub errors: Mutex<Vec<ErrorEntry>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record_action(&self, entry: ActionEntry) -> Result<()> {
            self.actions.lock().await.push(entry);
            Ok(())
        }

        async fn record_error(&self, entry: ErrorEntry) -> Result<()> {
            self.errors.lock().await.push(entry);
            Ok(())
        }
    }

    /// Always fails, proving audit failures stay on the side channel.
    pub struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record_action(&self, _entry: ActionEntry) -> Result<()> {
            Err(anyhow::anyhow!("sink unavailable"))
        }

        async fn record_error(&self, _entry: ErrorEntry) -> Result<()> {
            Err(anyhow::anyhow!("sink unavailable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FailingSink, RecordingSink};
    use super::*;
    use serde_json::json;

    #[test]
    fn log_type_strings() {
        assert_eq!(ActionKind::UserSignedUp.as_str(), "user-signed-up");
        assert_eq!(ActionKind::AdminSignedIn.as_str(), "admin-signed-in");
        assert_eq!(
            ActionKind::AdminLoggedInAsUser.as_str(),
            "admin-logged-in-as-a-user"
        );
        assert_eq!(
            ActionKind::UserEmailVerified.as_str(),
            "user-email-address-verified"
        );
    }

    #[tokio::test]
    async fn spawned_action_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let user_id = Uuid::new_v4();
        spawn_action_log(
            sink.clone(),
            ActionEntry::new(ActionKind::UserSignedIn, json!({"via": "email"})).user(user_id),
        );

        // The write happens on a spawned task; yield until it lands.
        for _ in 0..100 {
            if !sink.actions.lock().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let actions = sink.actions.lock().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::UserSignedIn);
        assert_eq!(actions[0].user_id, Some(user_id));
        assert_eq!(actions[0].admin_id, None);
    }

    #[tokio::test]
    async fn failing_sink_never_panics_the_caller() {
        let sink = Arc::new(FailingSink);
        spawn_action_log(
            sink.clone(),
            ActionEntry::new(ActionKind::UserLoggedOut, json!({})),
        );
        spawn_error_log(
            sink,
            ErrorEntry {
                endpoint: "/v1/user/login".to_string(),
                params: json!({}),
                details: "boom".to_string(),
                user_id: None,
                admin_id: None,
                ip_address: None,
            },
        );
        // Drain the spawned tasks; reaching this point without a panic is
        // the assertion.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn error_entries_capture_request_context() {
        let sink = Arc::new(RecordingSink::default());
        spawn_error_log(
            sink.clone(),
            ErrorEntry {
                endpoint: "/v1/admin/login".to_string(),
                params: json!({"bodyParams": {"email": "a@b.com"}}),
                details: "db down".to_string(),
                user_id: None,
                admin_id: Some(Uuid::new_v4()),
                ip_address: Some("1.2.3.4".to_string()),
            },
        );

        for _ in 0..100 {
            if !sink.errors.lock().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let errors = sink.errors.lock().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].endpoint, "/v1/admin/login");
        assert_eq!(errors[0].ip_address.as_deref(), Some("1.2.3.4"));
    }
}
