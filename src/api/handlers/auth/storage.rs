//! Database helpers for principals, one-time codes, and recovery tokens.
//!
//! Every mutation that consumes a code or token is a single
//! update-by-filter statement, so matching, expiry, and clearing serialize
//! on the store and concurrent duplicate requests cannot double-spend a
//! code. Expiry and cooldown comparisons run in SQL against `NOW()`.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::{Instrument, warn};
use uuid::Uuid;

use super::roles::AdminRole;
use super::utils::is_unique_violation;

/// Minimal user projection attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub country_code: Option<String>,
    pub phone_number: Option<String>,
    pub status: String,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub token_version: i32,
}

impl UserRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Fields needed to check an email/password login.
#[derive(Debug)]
pub(crate) struct UserLoginRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) password_hash: Option<String>,
    pub(crate) status: String,
    pub(crate) token_version: i32,
}

/// Minimal admin projection attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AdminRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: AdminRole,
    pub is_active: bool,
}

#[derive(Debug)]
pub(crate) struct AdminLoginRecord {
    pub(crate) id: Uuid,
    pub(crate) password_hash: Option<String>,
    pub(crate) is_active: bool,
}

/// Operational knobs for code/token lifetimes, consulted per call.
#[derive(Clone, Copy, Debug)]
pub(crate) struct VerificationConfig {
    pub(crate) email_verification_interval_secs: i64,
    pub(crate) email_verification_expiry_minutes: i64,
    pub(crate) password_recovery_interval_secs: i64,
    pub(crate) password_recovery_expiry_minutes: i64,
    pub(crate) phone_verification_expiry_minutes: i64,
}

/// Result of consuming a one-time phone code.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CodeOutcome {
    /// Matched, unexpired, and cleared.
    Consumed {
        id: Uuid,
        email: String,
        token_version: i32,
    },
    NotFound,
    Mismatch,
    Expired,
}

/// Result of a non-consuming pending-account code check.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PendingCodeOutcome {
    Valid,
    NotFound,
    Mismatch,
    Expired,
}

#[derive(Debug)]
pub(crate) enum SignupOutcome {
    Created { id: Uuid },
    Conflict,
}

#[derive(Debug)]
pub(crate) enum PromoteOutcome {
    Created { id: Uuid },
    Conflict,
    CodeNotFound,
    CodeMismatch,
    CodeExpired,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IssueOutcome {
    Issued,
    Cooldown,
    NotFound,
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Load the verification/recovery TTL configuration.
///
/// A missing configuration row falls back to zero-valued TTLs, which the
/// callers treat as already-expired codes; the warning makes the
/// misconfiguration visible in the logs.
pub(crate) async fn load_verification_config(pool: &PgPool) -> Result<VerificationConfig> {
    let query = r"
        SELECT email_verification_interval_secs,
               email_verification_expiry_minutes,
               password_recovery_interval_secs,
               password_recovery_expiry_minutes,
               phone_verification_expiry_minutes
        FROM configurations
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to load verification configuration")?;

    match row {
        Some(row) => Ok(VerificationConfig {
            email_verification_interval_secs: row.get("email_verification_interval_secs"),
            email_verification_expiry_minutes: row.get("email_verification_expiry_minutes"),
            password_recovery_interval_secs: row.get("password_recovery_interval_secs"),
            password_recovery_expiry_minutes: row.get("password_recovery_expiry_minutes"),
            phone_verification_expiry_minutes: row.get("phone_verification_expiry_minutes"),
        }),
        None => {
            warn!("configurations table is empty; verification TTLs fall back to zero");
            Ok(VerificationConfig {
                email_verification_interval_secs: 0,
                email_verification_expiry_minutes: 0,
                password_recovery_interval_secs: 0,
                password_recovery_expiry_minutes: 0,
                phone_verification_expiry_minutes: 0,
            })
        }
    }
}

/// Resolve a user by the id+email pair embedded in a token.
pub(crate) async fn find_user_for_auth(
    pool: &PgPool,
    id: Uuid,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, first_name, last_name, email, country_code, phone_number,
               status, is_email_verified, is_phone_verified, token_version
        FROM users
        WHERE id = $1 AND email = $2
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup user for auth")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        country_code: row.get("country_code"),
        phone_number: row.get("phone_number"),
        status: row.get("status"),
        is_email_verified: row.get("is_email_verified"),
        is_phone_verified: row.get("is_phone_verified"),
        token_version: row.get("token_version"),
    }))
}

pub(crate) async fn find_user_login(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserLoginRecord>> {
    let query = r"
        SELECT id, email, password_hash, status, token_version
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup user login record")?;

    Ok(row.map(|row| UserLoginRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        status: row.get("status"),
        token_version: row.get("token_version"),
    }))
}

/// Find the user owning a phone number, if any.
pub(crate) async fn find_user_by_phone(
    pool: &PgPool,
    country_code: &str,
    phone_number: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        SELECT id
        FROM users
        WHERE country_code = $1 AND phone_number = $2
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(country_code)
        .bind(phone_number)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup user by phone")?;
    Ok(row.map(|row| row.get("id")))
}

/// Set a fresh login code on an existing user, overwriting any live code.
pub(crate) async fn set_user_phone_code(
    pool: &PgPool,
    user_id: Uuid,
    code: &str,
    expiry_minutes: i64,
    device_type: Option<&str>,
    device_token: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET verification_code = $2,
            verification_code_expires_at = NOW() + ($3 * INTERVAL '1 minute'),
            device_type = COALESCE($4, device_type),
            device_token = COALESCE($5, device_token),
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(code)
        .bind(expiry_minutes)
        .bind(device_type)
        .bind(device_token)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to set user phone code")?;
    Ok(())
}

/// Create or refresh the pending account for an unseen phone number.
/// The upsert keeps a single live code per phone.
pub(crate) async fn upsert_temp_account(
    pool: &PgPool,
    country_code: &str,
    phone_number: &str,
    code: &str,
    expiry_minutes: i64,
    device_type: Option<&str>,
    device_token: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO temp_accounts
            (country_code, phone_number, verification_code,
             verification_code_expires_at, device_type, device_token)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 minute'), $5, $6)
        ON CONFLICT (country_code, phone_number) DO UPDATE
        SET verification_code = EXCLUDED.verification_code,
            verification_code_expires_at = EXCLUDED.verification_code_expires_at,
            device_type = COALESCE(EXCLUDED.device_type, temp_accounts.device_type),
            device_token = COALESCE(EXCLUDED.device_token, temp_accounts.device_token),
            updated_at = NOW()
    ";
    sqlx::query(query)
        .bind(country_code)
        .bind(phone_number)
        .bind(code)
        .bind(expiry_minutes)
        .bind(device_type)
        .bind(device_token)
        .execute(pool)
        .instrument(query_span("INSERT", query))
        .await
        .context("failed to upsert temp account")?;
    Ok(())
}

/// Consume an existing user's login code: mismatch and expiry are reported
/// separately, and a matched code is cleared in the same statement that
/// records the login.
pub(crate) async fn consume_user_phone_code(
    pool: &PgPool,
    country_code: &str,
    phone_number: &str,
    code: &str,
) -> Result<CodeOutcome> {
    let query = r"
        SELECT id, email, token_version, verification_code,
               (verification_code_expires_at IS NULL
                OR verification_code_expires_at <= NOW()) AS expired
        FROM users
        WHERE country_code = $1 AND phone_number = $2
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(country_code)
        .bind(phone_number)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup user phone code")?;

    let Some(row) = row else {
        return Ok(CodeOutcome::NotFound);
    };
    let stored: Option<String> = row.get("verification_code");
    match stored {
        None => return Ok(CodeOutcome::NotFound),
        Some(stored) if stored != code => return Ok(CodeOutcome::Mismatch),
        Some(_) => {}
    }
    if row.get::<bool, _>("expired") {
        return Ok(CodeOutcome::Expired);
    }

    let id: Uuid = row.get("id");
    let email: String = row.get("email");
    let token_version: i32 = row.get("token_version");

    let query = r"
        UPDATE users
        SET verification_code = NULL,
            verification_code_expires_at = NULL,
            is_phone_verified = TRUE,
            last_login_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
          AND verification_code = $2
          AND verification_code_expires_at > NOW()
        RETURNING id
    ";
    let consumed = sqlx::query(query)
        .bind(id)
        .bind(code)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to consume user phone code")?;

    // Zero rows here means a concurrent request spent the code first.
    if consumed.is_none() {
        return Ok(CodeOutcome::Expired);
    }
    Ok(CodeOutcome::Consumed {
        id,
        email,
        token_version,
    })
}

/// Existence check used for duplicate-email rejection before signup.
pub(crate) async fn email_in_use(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE email = $1 LIMIT 1";
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to check email usage")?;
    Ok(row.is_some())
}

/// Check a pending account's code without consuming it. The code is spent
/// later by the signup that promotes the account.
pub(crate) async fn check_temp_account_code(
    pool: &PgPool,
    country_code: &str,
    phone_number: &str,
    code: &str,
) -> Result<PendingCodeOutcome> {
    let query = r"
        SELECT verification_code,
               (verification_code_expires_at IS NULL
                OR verification_code_expires_at <= NOW()) AS expired
        FROM temp_accounts
        WHERE country_code = $1 AND phone_number = $2
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(country_code)
        .bind(phone_number)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup temp account code")?;

    let Some(row) = row else {
        return Ok(PendingCodeOutcome::NotFound);
    };
    let stored: Option<String> = row.get("verification_code");
    match stored {
        None => Ok(PendingCodeOutcome::NotFound),
        Some(stored) if stored != code => Ok(PendingCodeOutcome::Mismatch),
        Some(_) if row.get::<bool, _>("expired") => Ok(PendingCodeOutcome::Expired),
        Some(_) => Ok(PendingCodeOutcome::Valid),
    }
}

/// Promote a pending account into a full user.
///
/// The temp row is deleted and the user inserted in one transaction; the
/// delete's filter doubles as the atomic code consumption, so a stale
/// pending record can never shadow the new principal.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn promote_temp_account(
    pool: &PgPool,
    country_code: &str,
    phone_number: &str,
    code: &str,
    first_name: &str,
    last_name: Option<&str>,
    email: &str,
    referral_code: Option<&str>,
) -> Result<PromoteOutcome> {
    match check_temp_account_code(pool, country_code, phone_number, code).await? {
        PendingCodeOutcome::Valid => {}
        PendingCodeOutcome::NotFound => return Ok(PromoteOutcome::CodeNotFound),
        PendingCodeOutcome::Mismatch => return Ok(PromoteOutcome::CodeMismatch),
        PendingCodeOutcome::Expired => return Ok(PromoteOutcome::CodeExpired),
    }

    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        DELETE FROM temp_accounts
        WHERE country_code = $1
          AND phone_number = $2
          AND verification_code = $3
          AND verification_code_expires_at > NOW()
        RETURNING device_type, device_token
    ";
    let deleted = sqlx::query(query)
        .bind(country_code)
        .bind(phone_number)
        .bind(code)
        .fetch_optional(&mut *tx)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to consume temp account")?;

    let Some(deleted) = deleted else {
        // A concurrent signup consumed the pending record first.
        let _ = tx.rollback().await;
        return Ok(PromoteOutcome::CodeExpired);
    };
    let device_type: Option<String> = deleted.get("device_type");
    let device_token: Option<String> = deleted.get("device_token");

    let query = r"
        INSERT INTO users
            (first_name, last_name, email, country_code, phone_number,
             device_type, device_token, referral_code,
             is_phone_verified, last_login_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
        RETURNING id
    ";
    let inserted = sqlx::query(query)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(country_code)
        .bind(phone_number)
        .bind(device_type)
        .bind(device_token)
        .bind(referral_code)
        .fetch_one(&mut *tx)
        .instrument(query_span("INSERT", query))
        .await;

    let id: Uuid = match inserted {
        Ok(row) => row.get("id"),
        Err(err) => {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Ok(PromoteOutcome::Conflict);
            }
            return Err(err).context("failed to insert promoted user");
        }
    };

    tx.commit().await.context("commit signup transaction")?;
    Ok(PromoteOutcome::Created { id })
}

/// Create an email/password user. Duplicate email maps to `Conflict`.
pub(crate) async fn insert_email_user(
    pool: &PgPool,
    first_name: &str,
    last_name: &str,
    email: &str,
    password_hash: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (first_name, last_name, email, password_hash, last_login_at)
        VALUES ($1, $2, $3, $4, NOW())
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(query_span("INSERT", query))
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created { id: row.get("id") }),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(crate) async fn record_user_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to record user login")?;
    Ok(())
}

/// Replace the password and bump the token version, revoking every refresh
/// token issued before the change. The current-password check happens in the
/// handler; the filter on the old hash is not needed because the handler
/// already holds the row's latest state.
pub(crate) async fn update_user_password(
    pool: &PgPool,
    user_id: Uuid,
    new_password_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            token_version = token_version + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(new_password_hash)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to update user password")?;
    Ok(row.is_some())
}

/// Issue a password recovery token, enforcing the request cooldown in the
/// update's filter. Issuing overwrites any previous live token.
pub(crate) async fn issue_password_recovery(
    pool: &PgPool,
    email: &str,
    token_hash: &[u8],
    expiry_minutes: i64,
    interval_secs: i64,
) -> Result<IssueOutcome> {
    let query = r"
        UPDATE users
        SET password_recovery_token_hash = $2,
            password_recovery_expires_at = NOW() + ($3 * INTERVAL '1 minute'),
            password_recovery_requested_at = NOW(),
            updated_at = NOW()
        WHERE email = $1
          AND (password_recovery_requested_at IS NULL
               OR password_recovery_requested_at <= NOW() - ($4 * INTERVAL '1 second'))
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(email)
        .bind(token_hash)
        .bind(expiry_minutes)
        .bind(interval_secs)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to issue password recovery token")?;

    if row.is_some() {
        return Ok(IssueOutcome::Issued);
    }

    let query = "SELECT 1 FROM users WHERE email = $1 LIMIT 1";
    let exists = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to check user for recovery")?;
    if exists.is_some() {
        Ok(IssueOutcome::Cooldown)
    } else {
        Ok(IssueOutcome::NotFound)
    }
}

/// Consume a recovery token and set the new password in one statement.
/// A second call with the same token matches nothing: the hash is already
/// cleared, so the mutation cannot be replayed.
pub(crate) async fn consume_password_recovery(
    pool: &PgPool,
    token_hash: &[u8],
    new_password_hash: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            password_recovery_token_hash = NULL,
            password_recovery_expires_at = NULL,
            password_recovery_requested_at = NULL,
            token_version = token_version + 1,
            updated_at = NOW()
        WHERE password_recovery_token_hash = $1
          AND password_recovery_expires_at > NOW()
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(new_password_hash)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to consume password recovery token")?;
    Ok(row.map(|row| row.get("id")))
}

/// Issue an email verification token with the same cooldown discipline.
pub(crate) async fn issue_email_verification(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &[u8],
    expiry_minutes: i64,
    interval_secs: i64,
) -> Result<IssueOutcome> {
    let query = r"
        UPDATE users
        SET email_verification_token_hash = $2,
            email_verification_expires_at = NOW() + ($3 * INTERVAL '1 minute'),
            email_verification_requested_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
          AND (email_verification_requested_at IS NULL
               OR email_verification_requested_at <= NOW() - ($4 * INTERVAL '1 second'))
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(expiry_minutes)
        .bind(interval_secs)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to issue email verification token")?;

    if row.is_some() {
        Ok(IssueOutcome::Issued)
    } else {
        Ok(IssueOutcome::Cooldown)
    }
}

/// Consume an email verification token, activating the email flag.
pub(crate) async fn consume_email_verification(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE users
        SET is_email_verified = TRUE,
            email_verification_token_hash = NULL,
            email_verification_expires_at = NULL,
            email_verification_requested_at = NULL,
            updated_at = NOW()
        WHERE email_verification_token_hash = $1
          AND email_verification_expires_at > NOW()
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to consume email verification token")?;
    Ok(row.map(|row| row.get("id")))
}

/// Resolve an admin by the id+email pair embedded in a token.
pub(crate) async fn find_admin_for_auth(
    pool: &PgPool,
    id: Uuid,
    email: &str,
) -> Result<Option<AdminRecord>> {
    let query = r"
        SELECT id, name, email, role, is_active
        FROM admins
        WHERE id = $1 AND email = $2
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup admin for auth")?;

    row.map(admin_record_from_row).transpose()
}

fn admin_record_from_row(row: sqlx::postgres::PgRow) -> Result<AdminRecord> {
    let role_text: String = row.get("role");
    let role = AdminRole::parse(&role_text)
        .ok_or_else(|| anyhow!("unknown admin role in store: {role_text}"))?;
    Ok(AdminRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        role,
        is_active: row.get("is_active"),
    })
}

pub(crate) async fn find_admin_login(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AdminLoginRecord>> {
    let query = r"
        SELECT id, password_hash, is_active
        FROM admins
        WHERE email = $1
        LIMIT 1
    ";
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup admin login record")?;

    Ok(row.map(|row| AdminLoginRecord {
        id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
    }))
}

pub(crate) async fn record_admin_login(pool: &PgPool, admin_id: Uuid) -> Result<()> {
    let query = "UPDATE admins SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1";
    sqlx::query(query)
        .bind(admin_id)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to record admin login")?;
    Ok(())
}

/// Fresh role fetch for the impersonation permission gate; token claims are
/// trusted for identity only.
pub(crate) async fn fetch_admin_role(pool: &PgPool, admin_id: Uuid) -> Result<Option<AdminRole>> {
    let query = "SELECT role FROM admins WHERE id = $1 LIMIT 1";
    let row = sqlx::query(query)
        .bind(admin_id)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to fetch admin role")?;

    match row {
        None => Ok(None),
        Some(row) => {
            let role_text: String = row.get("role");
            let role = AdminRole::parse(&role_text)
                .ok_or_else(|| anyhow!("unknown admin role in store: {role_text}"))?;
            Ok(Some(role))
        }
    }
}

pub(crate) async fn insert_admin(
    pool: &PgPool,
    name: &str,
    email: &str,
    phone_number: Option<&str>,
    password_hash: &str,
    role: AdminRole,
    created_by: Uuid,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO admins (name, email, phone_number, password_hash, role, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(name)
        .bind(email)
        .bind(phone_number)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(created_by)
        .fetch_one(pool)
        .instrument(query_span("INSERT", query))
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created { id: row.get("id") }),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert admin"),
    }
}

pub(crate) async fn update_admin_password(
    pool: &PgPool,
    admin_id: Uuid,
    password_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE admins
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(password_hash)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to update admin password")?;
    Ok(row.is_some())
}

pub(crate) async fn set_admin_status(
    pool: &PgPool,
    admin_id: Uuid,
    is_active: bool,
) -> Result<bool> {
    let query = r"
        UPDATE admins
        SET is_active = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(is_active)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to update admin status")?;
    Ok(row.is_some())
}

/// Fetch a user's id+email for impersonation token minting.
pub(crate) async fn find_user_identity(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<(Uuid, String, i32)>> {
    let query = "SELECT id, email, token_version FROM users WHERE id = $1 LIMIT 1";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to lookup user identity")?;
    Ok(row.map(|row| (row.get("id"), row.get("email"), row.get("token_version"))))
}

/// Activate/deactivate a user account.
pub(crate) async fn set_user_status(pool: &PgPool, user_id: Uuid, status: &str) -> Result<bool> {
    let query = r"
        UPDATE users
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(status)
        .fetch_optional(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to update user status")?;
    Ok(row.is_some())
}

pub(crate) async fn increment_users_disabled(pool: &PgPool, admin_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE admins
        SET users_disabled_count = users_disabled_count + 1, updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(admin_id)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to increment users disabled count")?;
    Ok(())
}
