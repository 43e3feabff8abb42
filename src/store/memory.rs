//! In-memory identity store for local development and tests.
//!
//! Credentials are kept as SHA-256 digests and nothing survives a restart;
//! production deployments use the Postgres adapter instead.

use anyhow::{bail, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    generate_token, hash_token, Account, AccountCreation, AccountId, ConfirmationToken,
    CredentialPolicy, IdentityStore, PolicyViolation, SessionToken, SignInResult,
    LOCKOUT_SECONDS, MAX_FAILED_SIGN_INS,
};

pub struct MemoryIdentityStore {
    policy: CredentialPolicy,
    require_confirmed_email: bool,
    max_failed_sign_ins: u32,
    lockout_window: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, AccountSlot>,
    emails: HashMap<String, Uuid>,
    tokens: HashMap<Uuid, Vec<Vec<u8>>>,
    sessions: HashMap<Vec<u8>, Uuid>,
}

struct AccountSlot {
    email: String,
    display_name: String,
    credential: Vec<u8>,
    email_confirmed: bool,
    two_factor_enabled: bool,
    failed_sign_ins: u32,
    locked_until: Option<Instant>,
}

impl AccountSlot {
    fn locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    fn account(&self, id: Uuid, now: Instant) -> Account {
        Account {
            id: AccountId::from(id),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            email_confirmed: self.email_confirmed,
            locked_out: self.locked(now),
        }
    }
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: CredentialPolicy::new(),
            require_confirmed_email: true,
            max_failed_sign_ins: MAX_FAILED_SIGN_INS,
            lockout_window: Duration::from_secs(LOCKOUT_SECONDS.unsigned_abs()),
            state: Mutex::new(State::default()),
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
        self.max_failed_sign_ins = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    /// Number of accounts currently held.
    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Flip the second-factor flag; `false` when the account is unknown.
    pub async fn set_two_factor(&self, account_id: AccountId, enabled: bool) -> bool {
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(&account_id.as_uuid()) {
            Some(slot) => {
                slot.two_factor_enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn credential_digest(password: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.finalize().to_vec()
    }
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn verify_credentials(
        &self,
        username: &str,
        password: &SecretString,
        _remember_me: bool,
    ) -> Result<SignInResult> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let Some(id) = state.emails.get(username).copied() else {
            return Ok(SignInResult::Failed);
        };
        let Some(slot) = state.accounts.get_mut(&id) else {
            return Ok(SignInResult::Failed);
        };

        if slot.locked(now) {
            return Ok(SignInResult::LockedOut);
        }
        if self.require_confirmed_email && !slot.email_confirmed {
            return Ok(SignInResult::NotAllowed);
        }

        if Self::credential_digest(password.expose_secret()) != slot.credential {
            slot.failed_sign_ins += 1;
            if slot.failed_sign_ins >= self.max_failed_sign_ins {
                slot.locked_until = Some(now + self.lockout_window);
                return Ok(SignInResult::LockedOut);
            }
            return Ok(SignInResult::Failed);
        }

        slot.failed_sign_ins = 0;
        slot.locked_until = None;

        if slot.two_factor_enabled {
            return Ok(SignInResult::RequiresTwoFactor);
        }

        let token = generate_token()?;
        state.sessions.insert(hash_token(&token), id);
        Ok(SignInResult::Succeeded {
            session: SessionToken::new(token),
        })
    }

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AccountCreation> {
        let mut violations = self.policy.violations(password.expose_secret());
        let mut state = self.state.lock().await;

        if state.emails.contains_key(email) {
            violations.push(PolicyViolation::duplicate_email(email));
        }
        if !violations.is_empty() {
            return Ok(AccountCreation::Rejected(violations));
        }

        let id = Uuid::new_v4();
        state.accounts.insert(
            id,
            AccountSlot {
                email: email.to_string(),
                display_name: email.to_string(),
                credential: Self::credential_digest(password.expose_secret()),
                email_confirmed: false,
                two_factor_enabled: false,
                failed_sign_ins: 0,
                locked_until: None,
            },
        );
        state.emails.insert(email.to_string(), id);

        Ok(AccountCreation::Created(Account {
            id: AccountId::from(id),
            email: email.to_string(),
            display_name: email.to_string(),
            email_confirmed: false,
            locked_out: false,
        }))
    }

    async fn issue_confirmation_token(&self, account_id: AccountId) -> Result<ConfirmationToken> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(&account_id.as_uuid()) {
            bail!("no account {account_id}");
        }
        let token = generate_token()?;
        state
            .tokens
            .entry(account_id.as_uuid())
            .or_default()
            .push(hash_token(&token));
        Ok(ConfirmationToken::new(token))
    }

    async fn verify_confirmation_token(&self, account_id: AccountId, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        let mut state = self.state.lock().await;

        let matched = state
            .tokens
            .get(&account_id.as_uuid())
            .is_some_and(|hashes| hashes.iter().any(|hash| *hash == token_hash));
        if !matched {
            return Ok(false);
        }

        // All outstanding tokens for the account are consumed on success.
        state.tokens.remove(&account_id.as_uuid());
        if let Some(slot) = state.accounts.get_mut(&account_id.as_uuid()) {
            slot.email_confirmed = true;
        }
        Ok(true)
    }

    async fn find_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&account_id.as_uuid())
            .map(|slot| slot.account(account_id.as_uuid(), now)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .emails
            .get(email)
            .copied()
            .and_then(|id| state.accounts.get(&id).map(|slot| slot.account(id, now))))
    }

    async fn end_session(&self, session: &SessionToken) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.remove(&hash_token(session.as_str()));
        Ok(())
    }
}
