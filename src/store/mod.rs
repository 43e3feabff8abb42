//! Identity storage capability and the types shared by its adapters.
//!
//! The workflow only talks to `IdentityStore`; whether accounts live in
//! Postgres or in memory is the caller's choice at startup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
pub const REMEMBER_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
pub const CONFIRMATION_TOKEN_TTL_SECONDS: i64 = 30 * 60;
pub const MAX_FAILED_SIGN_INS: u32 = 5;
pub const LOCKOUT_SECONDS: i64 = 15 * 60;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Opaque account identifier, stable across the account's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccountId(Uuid);

impl AccountId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

/// Snapshot of an account as the store sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
    pub email_confirmed: bool,
    pub locked_out: bool,
}

/// Raw confirmation token handed out exactly once; stores keep only a hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub(crate) fn new(raw: String) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw session token for the auth cookie; stores keep only a hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub(crate) fn new(raw: String) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Why an account could not be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyViolation {
    pub code: &'static str,
    pub description: String,
}

impl PolicyViolation {
    pub(crate) fn duplicate_email(email: &str) -> Self {
        Self {
            code: "duplicate_email",
            description: format!("An account with the email {email} already exists"),
        }
    }

    pub(crate) fn password_too_short(min_length: usize) -> Self {
        Self {
            code: "password_too_short",
            description: format!("Passwords must be at least {min_length} characters long"),
        }
    }

    pub(crate) fn password_requires_digit() -> Self {
        Self {
            code: "password_requires_digit",
            description: "Passwords must have at least one digit ('0'-'9')".to_string(),
        }
    }

    pub(crate) fn password_requires_letter() -> Self {
        Self {
            code: "password_requires_letter",
            description: "Passwords must have at least one letter ('a'-'z')".to_string(),
        }
    }
}

/// Password rules enforced by the store adapters at account creation.
#[derive(Clone, Debug)]
pub struct CredentialPolicy {
    min_length: usize,
    require_digit: bool,
    require_letter: bool,
}

impl CredentialPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            require_digit: true,
            require_letter: true,
        }
    }

    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    #[must_use]
    pub fn with_require_digit(mut self, require_digit: bool) -> Self {
        self.require_digit = require_digit;
        self
    }

    #[must_use]
    pub fn with_require_letter(mut self, require_letter: bool) -> Self {
        self.require_letter = require_letter;
        self
    }

    /// Collect every violated rule so callers can report them all at once.
    #[must_use]
    pub fn violations(&self, password: &str) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        if password.chars().count() < self.min_length {
            violations.push(PolicyViolation::password_too_short(self.min_length));
        }
        if self.require_digit && !password.chars().any(|ch| ch.is_ascii_digit()) {
            violations.push(PolicyViolation::password_requires_digit());
        }
        if self.require_letter && !password.chars().any(char::is_alphabetic) {
            violations.push(PolicyViolation::password_requires_letter());
        }
        violations
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a password sign-in attempt.
#[derive(Debug)]
pub enum SignInResult {
    Succeeded { session: SessionToken },
    LockedOut,
    NotAllowed,
    RequiresTwoFactor,
    Failed,
}

/// Result of an account creation attempt.
#[derive(Debug)]
pub enum AccountCreation {
    Created(Account),
    Rejected(Vec<PolicyViolation>),
}

/// Durable account state: credentials, confirmation tokens and sessions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Check a password against the stored credential and open a session on
    /// success. Failed attempts count towards lockout.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &SecretString,
        remember_me: bool,
    ) -> Result<SignInResult>;

    /// Create an unconfirmed account, enforcing the credential policy and
    /// email uniqueness.
    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AccountCreation>;

    /// Mint a single-use confirmation token bound to the account.
    async fn issue_confirmation_token(&self, account_id: AccountId) -> Result<ConfirmationToken>;

    /// Consume a confirmation token; `true` marks the email confirmed.
    async fn verify_confirmation_token(&self, account_id: AccountId, token: &str) -> Result<bool>;

    async fn find_by_id(&self, account_id: AccountId) -> Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Drop a session; unknown tokens are not an error.
    async fn end_session(&self, session: &SessionToken) -> Result<()>;
}

/// Create a random token for confirmation links and session cookies.
/// The raw value is only handed to the caller; adapters store a hash.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a token so raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
