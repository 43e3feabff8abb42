//! Postgres-backed identity store.
//!
//! Credentials are argon2 hashes, confirmation and session tokens are stored
//! as SHA-256 digests only. See `sql/schema.sql` for the expected tables.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    generate_token, hash_token, Account, AccountCreation, AccountId, ConfirmationToken,
    CredentialPolicy, IdentityStore, PolicyViolation, SessionToken, SignInResult,
    CONFIRMATION_TOKEN_TTL_SECONDS, DEFAULT_SESSION_TTL_SECONDS, LOCKOUT_SECONDS,
    MAX_FAILED_SIGN_INS, REMEMBER_SESSION_TTL_SECONDS,
};

pub struct PgIdentityStore {
    pool: PgPool,
    policy: CredentialPolicy,
    require_confirmed_email: bool,
    max_failed_sign_ins: i64,
    lockout_seconds: i64,
    session_ttl_seconds: i64,
    remember_session_ttl_seconds: i64,
    token_ttl_seconds: i64,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: CredentialPolicy::new(),
            require_confirmed_email: true,
            max_failed_sign_ins: i64::from(MAX_FAILED_SIGN_INS),
            lockout_seconds: LOCKOUT_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_session_ttl_seconds: REMEMBER_SESSION_TTL_SECONDS,
            token_ttl_seconds: CONFIRMATION_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_require_confirmed_email(mut self, required: bool) -> Self {
        self.require_confirmed_email = required;
        self
    }

    #[must_use]
    pub fn with_max_failed_sign_ins(mut self, attempts: u32) -> Self {
        self.max_failed_sign_ins = i64::from(attempts);
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    async fn email_taken(&self, email: &str) -> Result<bool> {
        let query = "SELECT EXISTS(SELECT 1 FROM accounts WHERE email = $1) AS taken";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check email uniqueness")?;
        Ok(row.get("taken"))
    }

    /// Bump the failure counter and report whether this attempt tripped the
    /// lockout threshold.
    async fn record_failed_sign_in(&self, account_id: Uuid) -> Result<SignInResult> {
        let query = r"
            UPDATE accounts
            SET failed_sign_ins = failed_sign_ins + 1,
                locked_until = CASE
                    WHEN failed_sign_ins + 1 >= $2 THEN NOW() + ($3 * INTERVAL '1 second')
                    ELSE locked_until
                END
            WHERE id = $1
            RETURNING (locked_until IS NOT NULL AND locked_until > NOW()) AS locked_out
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(self.max_failed_sign_ins)
            .bind(self.lockout_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record sign-in failure")?;

        if row.get("locked_out") {
            Ok(SignInResult::LockedOut)
        } else {
            Ok(SignInResult::Failed)
        }
    }

    async fn reset_sign_in_failures(&self, account_id: Uuid) -> Result<()> {
        let query = "UPDATE accounts SET failed_sign_ins = 0, locked_until = NULL WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset sign-in failures")?;
        Ok(())
    }

    /// Insert a session row and return the raw token for the cookie.
    async fn open_session(&self, account_id: Uuid, remember_me: bool) -> Result<SessionToken> {
        let ttl_seconds = if remember_me {
            self.remember_session_ttl_seconds
        } else {
            self.session_ttl_seconds
        };
        let query = r"
            INSERT INTO account_sessions (account_id, session_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        for _ in 0..3 {
            let token = generate_token()?;
            let token_hash = hash_token(&token);
            let result = sqlx::query(query)
                .bind(account_id)
                .bind(token_hash)
                .bind(ttl_seconds)
                .execute(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(_) => return Ok(SessionToken::new(token)),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }
}

fn hash_credential(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .context("failed to generate credential salt")?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|err| anyhow!("failed to encode credential salt: {err}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash credential: {err}"))?;
    Ok(hash.to_string())
}

fn verify_credential(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn account_from_row(row: &PgRow) -> Account {
    let id: Uuid = row.get("id");
    Account {
        id: AccountId::from(id),
        email: row.get("email"),
        display_name: row.get("display_name"),
        email_confirmed: row.get("email_confirmed"),
        locked_out: row.get("locked_out"),
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn verify_credentials(
        &self,
        username: &str,
        password: &SecretString,
        remember_me: bool,
    ) -> Result<SignInResult> {
        let query = r"
            SELECT id, credential_hash, email_confirmed, two_factor_enabled,
                   (locked_until IS NOT NULL AND locked_until > NOW()) AS locked_out
            FROM accounts
            WHERE email = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account for sign-in")?;

        let Some(row) = row else {
            return Ok(SignInResult::Failed);
        };

        let account_id: Uuid = row.get("id");
        let credential_hash: String = row.get("credential_hash");
        let email_confirmed: bool = row.get("email_confirmed");
        let two_factor_enabled: bool = row.get("two_factor_enabled");
        let locked_out: bool = row.get("locked_out");

        if locked_out {
            return Ok(SignInResult::LockedOut);
        }
        if self.require_confirmed_email && !email_confirmed {
            return Ok(SignInResult::NotAllowed);
        }
        if !verify_credential(password.expose_secret(), &credential_hash) {
            return self.record_failed_sign_in(account_id).await;
        }

        self.reset_sign_in_failures(account_id).await?;

        if two_factor_enabled {
            return Ok(SignInResult::RequiresTwoFactor);
        }

        let session = self.open_session(account_id, remember_me).await?;
        Ok(SignInResult::Succeeded { session })
    }

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AccountCreation> {
        let mut violations = self.policy.violations(password.expose_secret());
        if self.email_taken(email).await? {
            violations.push(PolicyViolation::duplicate_email(email));
        }
        if !violations.is_empty() {
            return Ok(AccountCreation::Rejected(violations));
        }

        let credential_hash = hash_credential(password.expose_secret())?;

        let query = r"
            INSERT INTO accounts (email, display_name, credential_hash)
            VALUES ($1, $1, $2)
            RETURNING id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .bind(&credential_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        let id: Uuid = match row {
            Ok(row) => row.get("id"),
            Err(err) => {
                // Concurrent registration with the same email loses the race.
                if is_unique_violation(&err) {
                    return Ok(AccountCreation::Rejected(vec![
                        PolicyViolation::duplicate_email(email),
                    ]));
                }
                return Err(err).context("failed to insert account");
            }
        };

        Ok(AccountCreation::Created(Account {
            id: AccountId::from(id),
            email: email.to_string(),
            display_name: email.to_string(),
            email_confirmed: false,
            locked_out: false,
        }))
    }

    async fn issue_confirmation_token(&self, account_id: AccountId) -> Result<ConfirmationToken> {
        let token = generate_token()?;
        let token_hash = hash_token(&token);

        let query = r"
            INSERT INTO confirmation_tokens (account_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id.as_uuid())
            .bind(token_hash)
            .bind(self.token_ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert confirmation token")?;

        Ok(ConfirmationToken::new(token))
    }

    async fn verify_confirmation_token(&self, account_id: AccountId, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to start confirmation transaction")?;

        let query = r"
            DELETE FROM confirmation_tokens
            WHERE account_id = $1
              AND token_hash = $2
              AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let deleted = sqlx::query(query)
            .bind(account_id.as_uuid())
            .bind(token_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume confirmation token")?;

        if deleted.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(false);
        }

        // One token confirmed the account; outstanding ones are dead weight.
        let query = "DELETE FROM confirmation_tokens WHERE account_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id.as_uuid())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to sweep confirmation tokens")?;

        let query = "UPDATE accounts SET email_confirmed = TRUE WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id.as_uuid())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to mark email confirmed")?;

        tx.commit()
            .await
            .context("failed to commit confirmation transaction")?;

        Ok(true)
    }

    async fn find_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
        let query = r"
            SELECT id, email, display_name, email_confirmed,
                   (locked_until IS NOT NULL AND locked_until > NOW()) AS locked_out
            FROM accounts
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(account_id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to find account by id")?;

        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = r"
            SELECT id, email, display_name, email_confirmed,
                   (locked_until IS NOT NULL AND locked_until > NOW()) AS locked_out
            FROM accounts
            WHERE email = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to find account by email")?;

        Ok(row.as_ref().map(account_from_row))
    }

    async fn end_session(&self, session: &SessionToken) -> Result<()> {
        let session_hash = hash_token(session.as_str());
        let query = "DELETE FROM account_sessions WHERE session_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}
