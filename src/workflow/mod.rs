//! Sign-in, registration, email confirmation and logout orchestration.
//!
//! `AuthWorkflow` owns the order of operations and the outcome types; durable
//! state stays behind `IdentityStore` and delivery behind `EmailSender`.

mod outcomes;
mod redirect;
mod validate;

pub use outcomes::{
    ConfirmationOutcome, FieldError, LoginOutcome, RegistrationOutcome, ResendOutcome,
    SignInDenial,
};

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::email::{EmailMessage, EmailSender};
use crate::store::{
    AccountCreation, AccountId, ConfirmationToken, IdentityStore, SessionToken, SignInResult,
};

/// Route that confirmation links point at; the HTTP layer mounts the matching
/// handler on the same path.
pub const CONFIRM_EMAIL_PATH: &str = "/v1/auth/confirm-email";

const CONFIRM_SUBJECT: &str = "Confirm your account";
const INVALID_EMAIL_MESSAGE: &str = "Invalid email address";

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    public_base_url: Url,
    default_landing: String,
}

impl WorkflowConfig {
    #[must_use]
    pub fn new(public_base_url: Url) -> Self {
        Self {
            public_base_url,
            default_landing: "/".to_string(),
        }
    }

    #[must_use]
    pub fn with_default_landing(mut self, path: String) -> Self {
        self.default_landing = path;
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &Url {
        &self.public_base_url
    }

    #[must_use]
    pub fn default_landing(&self) -> &str {
        &self.default_landing
    }

    /// Only mark cookies secure when the service is reached over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.public_base_url.scheme() == "https"
    }
}

pub struct AuthWorkflow {
    store: Arc<dyn IdentityStore>,
    mailer: Arc<dyn EmailSender>,
    config: WorkflowConfig,
}

impl AuthWorkflow {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        mailer: Arc<dyn EmailSender>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Check credentials and open a session. The store owns lockout counting;
    /// the workflow only maps its verdict and confines the redirect target.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
        remember_me: bool,
        return_to: Option<&str>,
    ) -> Result<LoginOutcome> {
        let username = normalize_email(username);
        let result = self
            .store
            .verify_credentials(&username, password, remember_me)
            .await?;

        Ok(match result {
            SignInResult::Succeeded { session } => {
                let redirect_to =
                    redirect::resolve_return_to(return_to, self.config.default_landing());
                info!(username = %username, "sign-in succeeded");
                LoginOutcome::SignedIn {
                    session,
                    redirect_to,
                }
            }
            SignInResult::LockedOut => LoginOutcome::Denied(SignInDenial::LockedOut),
            SignInResult::NotAllowed => LoginOutcome::Denied(SignInDenial::NotAllowed),
            SignInResult::RequiresTwoFactor => {
                LoginOutcome::Denied(SignInDenial::RequiresTwoFactor)
            }
            SignInResult::Failed => LoginOutcome::Denied(SignInDenial::InvalidCredentials),
        })
    }

    /// Create an account and send the confirmation email.
    ///
    /// When delivery fails the account stays behind unconfirmed;
    /// `resend_confirmation` covers the recovery.
    pub async fn register(
        &self,
        email: &str,
        password: &SecretString,
        link_base: &Url,
    ) -> Result<RegistrationOutcome> {
        let email = normalize_email(email);
        if !validate::valid_email(&email).await {
            debug!("registration rejected: email failed the syntax check");
            return Ok(RegistrationOutcome::Rejected(vec![FieldError::form_level(
                INVALID_EMAIL_MESSAGE,
            )]));
        }

        match self.store.create_account(&email, password).await? {
            AccountCreation::Rejected(violations) => {
                debug!(
                    violations = violations.len(),
                    "registration rejected by account policy"
                );
                Ok(RegistrationOutcome::Rejected(
                    violations.into_iter().map(FieldError::from).collect(),
                ))
            }
            AccountCreation::Created(account) => {
                info!(account_id = %account.id, "account created");
                match self
                    .send_confirmation(account.id, &account.email, link_base)
                    .await?
                {
                    Some(link) => Ok(RegistrationOutcome::ConfirmationSent {
                        account_id: account.id,
                        link,
                    }),
                    None => Ok(RegistrationOutcome::DeliveryFailed),
                }
            }
        }
    }

    /// Send a fresh confirmation email for an unconfirmed account.
    ///
    /// Unknown and already-confirmed addresses come back as `Noop` so the
    /// HTTP layer can answer uniformly.
    pub async fn resend_confirmation(&self, email: &str, link_base: &Url) -> Result<ResendOutcome> {
        let email = normalize_email(email);
        if !validate::valid_email(&email).await {
            return Ok(ResendOutcome::Noop);
        }
        let Some(account) = self.store.find_by_email(&email).await? else {
            return Ok(ResendOutcome::Noop);
        };
        if account.email_confirmed {
            return Ok(ResendOutcome::Noop);
        }

        match self
            .send_confirmation(account.id, &account.email, link_base)
            .await?
        {
            Some(_) => Ok(ResendOutcome::Queued),
            None => Ok(ResendOutcome::SendFailed),
        }
    }

    /// Consume a confirmation link. Absent or malformed parameters resolve
    /// without touching the store.
    pub async fn confirm_email(
        &self,
        account_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<ConfirmationOutcome> {
        let (Some(account_id), Some(token)) = (account_id, token) else {
            return Ok(ConfirmationOutcome::Error);
        };
        // A malformed id cannot belong to any account; skip the lookup.
        let Ok(account_id) = account_id.parse::<AccountId>() else {
            return Ok(ConfirmationOutcome::Error);
        };
        let Some(account) = self.store.find_by_id(account_id).await? else {
            return Ok(ConfirmationOutcome::Error);
        };

        if self
            .store
            .verify_confirmation_token(account.id, token)
            .await?
        {
            info!(account_id = %account.id, "email confirmed");
            Ok(ConfirmationOutcome::Confirmed)
        } else {
            Ok(ConfirmationOutcome::Error)
        }
    }

    /// End the session, if any, and hand back the landing path. Logout always
    /// lands the caller there, session or not.
    pub async fn logout(&self, session: Option<SessionToken>) -> String {
        if let Some(session) = session {
            if let Err(err) = self.store.end_session(&session).await {
                error!("Failed to end session: {err}");
            }
        }
        self.config.default_landing().to_string()
    }

    async fn send_confirmation(
        &self,
        account_id: AccountId,
        email: &str,
        link_base: &Url,
    ) -> Result<Option<String>> {
        let token = self.store.issue_confirmation_token(account_id).await?;
        let link = confirmation_link(link_base, account_id, &token)?;
        let message = EmailMessage {
            to: email.to_string(),
            subject: CONFIRM_SUBJECT.to_string(),
            html_body: confirmation_body(&link),
        };
        match self.mailer.send(&message).await {
            Ok(()) => Ok(Some(link)),
            Err(err) => {
                error!("Could not send confirmation email: {err}");
                Ok(None)
            }
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn confirmation_link(
    link_base: &Url,
    account_id: AccountId,
    token: &ConfirmationToken,
) -> Result<String> {
    let mut link = link_base
        .join(CONFIRM_EMAIL_PATH)
        .context("confirmation link base is not a valid absolute URL")?;
    link.query_pairs_mut()
        .append_pair("user_id", &account_id.to_string())
        .append_pair("token", token.as_str());
    Ok(link.to_string())
}

fn confirmation_body(link: &str) -> String {
    format!("Please confirm your account by clicking this link: <a href=\"{link}\">link</a>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Account, MemoryIdentityStore};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Store double that counts calls while delegating to the memory store.
    struct ProbeStore {
        inner: MemoryIdentityStore,
        verify_calls: AtomicUsize,
        create_calls: AtomicUsize,
        find_calls: AtomicUsize,
        token_checks: AtomicUsize,
    }

    impl ProbeStore {
        fn new() -> Self {
            Self {
                inner: MemoryIdentityStore::new(),
                verify_calls: AtomicUsize::new(0),
                create_calls: AtomicUsize::new(0),
                find_calls: AtomicUsize::new(0),
                token_checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityStore for ProbeStore {
        async fn verify_credentials(
            &self,
            username: &str,
            password: &SecretString,
            remember_me: bool,
        ) -> Result<SignInResult> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .verify_credentials(username, password, remember_me)
                .await
        }

        async fn create_account(
            &self,
            email: &str,
            password: &SecretString,
        ) -> Result<AccountCreation> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create_account(email, password).await
        }

        async fn issue_confirmation_token(
            &self,
            account_id: AccountId,
        ) -> Result<ConfirmationToken> {
            self.inner.issue_confirmation_token(account_id).await
        }

        async fn verify_confirmation_token(
            &self,
            account_id: AccountId,
            token: &str,
        ) -> Result<bool> {
            self.token_checks.fetch_add(1, Ordering::SeqCst);
            self.inner.verify_confirmation_token(account_id, token).await
        }

        async fn find_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_id(account_id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_email(email).await
        }

        async fn end_session(&self, session: &SessionToken) -> Result<()> {
            self.inner.end_session(session).await
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl EmailSender for FailingSender {
        async fn send(&self, _message: &EmailMessage) -> Result<()> {
            bail!("smtp relay refused the message")
        }
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn base() -> Url {
        Url::parse("https://accounts.example").unwrap()
    }

    fn workflow(store: Arc<dyn IdentityStore>, mailer: Arc<dyn EmailSender>) -> AuthWorkflow {
        let config = WorkflowConfig::new(base());
        AuthWorkflow::new(store, mailer, config)
    }

    fn link_params(link: &str) -> (String, String) {
        let url = Url::parse(link).unwrap();
        let mut user_id = None;
        let mut token = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "user_id" => user_id = Some(value.into_owned()),
                "token" => token = Some(value.into_owned()),
                _ => {}
            }
        }
        (user_id.unwrap(), token.unwrap())
    }

    #[tokio::test]
    async fn invalid_email_never_reaches_store_or_sender() -> Result<()> {
        let store = Arc::new(ProbeStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store.clone(), sender.clone());

        for email in ["", "missing-at.example.com", "user@@example.com", "a..b@x.co"] {
            let outcome = workflow
                .register(email, &secret("hunter2-str0ng"), &base())
                .await?;
            match outcome {
                RegistrationOutcome::Rejected(errors) => {
                    assert_eq!(errors.len(), 1);
                    assert_eq!(errors[0].message, "Invalid email address");
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }

        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
        assert!(sender.sent.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn register_confirm_login_round_trip() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store.clone(), sender.clone());

        let outcome = workflow
            .register(" Alice@Example.COM ", &secret("hunter2-str0ng"), &base())
            .await?;
        let RegistrationOutcome::ConfirmationSent { account_id, link } = outcome else {
            panic!("expected a confirmation link");
        };

        // The link carries the id and token and points at the confirm route.
        assert!(link.starts_with("https://accounts.example/v1/auth/confirm-email?"));
        let (link_user_id, link_token) = link_params(&link);
        assert_eq!(link_user_id, account_id.to_string());

        // Exactly one email went to the normalized address with the link.
        {
            let sent = sender.sent.lock().await;
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].to, "alice@example.com");
            assert_eq!(sent[0].subject, "Confirm your account");
            assert!(sent[0].html_body.contains(&link));
        }

        let confirmed = workflow
            .confirm_email(Some(&link_user_id), Some(&link_token))
            .await?;
        assert_eq!(confirmed, ConfirmationOutcome::Confirmed);

        let outcome = workflow
            .login("alice@example.com", &secret("hunter2-str0ng"), false, None)
            .await?;
        let LoginOutcome::SignedIn { redirect_to, .. } = outcome else {
            panic!("expected a session");
        };
        assert_eq!(redirect_to, "/");
        Ok(())
    }

    #[tokio::test]
    async fn login_before_confirmation_is_denied() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store, sender);

        workflow
            .register("bob@example.com", &secret("hunter2-str0ng"), &base())
            .await?;

        let outcome = workflow
            .login("bob@example.com", &secret("hunter2-str0ng"), false, None)
            .await?;
        match outcome {
            LoginOutcome::Denied(denial) => assert_eq!(denial, SignInDenial::NotAllowed),
            LoginOutcome::SignedIn { .. } => panic!("unconfirmed account must not sign in"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_reports_without_second_account() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store.clone(), sender);

        workflow
            .register("carol@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        let outcome = workflow
            .register("carol@example.com", &secret("other-passw0rd"), &base())
            .await?;

        match outcome {
            RegistrationOutcome::Rejected(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("already exists"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(store.account_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn weak_password_surfaces_every_violation() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store, sender);

        let outcome = workflow
            .register("dave@example.com", &secret("short"), &base())
            .await?;
        match outcome {
            RegistrationOutcome::Rejected(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].message.contains("at least 8 characters"));
                assert!(errors[1].message.contains("at least one digit"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn confirm_with_absent_parameters_skips_the_store() -> Result<()> {
        let store = Arc::new(ProbeStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store.clone(), sender);

        assert_eq!(
            workflow.confirm_email(None, None).await?,
            ConfirmationOutcome::Error
        );
        assert_eq!(
            workflow.confirm_email(Some("id"), None).await?,
            ConfirmationOutcome::Error
        );
        assert_eq!(
            workflow.confirm_email(None, Some("token")).await?,
            ConfirmationOutcome::Error
        );
        // Malformed ids stop before the lookup as well.
        assert_eq!(
            workflow
                .confirm_email(Some("not-a-uuid"), Some("token"))
                .await?,
            ConfirmationOutcome::Error
        );

        assert_eq!(store.find_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.token_checks.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn confirm_with_wrong_token_is_an_error() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store, sender);

        let outcome = workflow
            .register("erin@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        let RegistrationOutcome::ConfirmationSent { account_id, .. } = outcome else {
            panic!("expected a confirmation link");
        };

        let confirmed = workflow
            .confirm_email(Some(&account_id.to_string()), Some("forged-token"))
            .await?;
        assert_eq!(confirmed, ConfirmationOutcome::Error);
        Ok(())
    }

    #[tokio::test]
    async fn hostile_return_to_falls_back_to_landing() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store, sender.clone());

        let outcome = workflow
            .register("frank@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        let RegistrationOutcome::ConfirmationSent { .. } = outcome else {
            panic!("expected a confirmation link");
        };
        let sent_link = {
            let sent = sender.sent.lock().await;
            extract_href(&sent[0].html_body)
        };
        let (user_id, token) = link_params(&sent_link);
        workflow
            .confirm_email(Some(&user_id), Some(&token))
            .await?;

        for hostile in ["https://evil.example", "//evil.example", "/\\evil.example"] {
            let outcome = workflow
                .login(
                    "frank@example.com",
                    &secret("hunter2-str0ng"),
                    false,
                    Some(hostile),
                )
                .await?;
            let LoginOutcome::SignedIn { redirect_to, .. } = outcome else {
                panic!("expected a session");
            };
            assert_eq!(redirect_to, "/", "must not redirect to {hostile}");
        }

        let outcome = workflow
            .login(
                "frank@example.com",
                &secret("hunter2-str0ng"),
                false,
                Some("/dashboard"),
            )
            .await?;
        let LoginOutcome::SignedIn { redirect_to, .. } = outcome else {
            panic!("expected a session");
        };
        assert_eq!(redirect_to, "/dashboard");
        Ok(())
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_account() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let workflow = workflow(store.clone(), Arc::new(FailingSender));

        let outcome = workflow
            .register("grace@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        assert!(matches!(outcome, RegistrationOutcome::DeliveryFailed));

        // The account was not rolled back and is still unconfirmed.
        let account = store.find_by_email("grace@example.com").await?;
        assert_eq!(
            account.map(|account| account.email_confirmed),
            Some(false)
        );
        Ok(())
    }

    #[tokio::test]
    async fn resend_covers_a_failed_first_delivery() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let failing = workflow(store.clone(), Arc::new(FailingSender));
        let outcome = failing
            .register("heidi@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        assert!(matches!(outcome, RegistrationOutcome::DeliveryFailed));

        let sender = Arc::new(RecordingSender::default());
        let recovering = workflow(store, sender.clone());
        let outcome = recovering
            .resend_confirmation("heidi@example.com", &base())
            .await?;
        assert_eq!(outcome, ResendOutcome::Queued);

        let sent_link = {
            let sent = sender.sent.lock().await;
            assert_eq!(sent.len(), 1);
            extract_href(&sent[0].html_body)
        };
        let (user_id, token) = link_params(&sent_link);
        let confirmed = recovering
            .confirm_email(Some(&user_id), Some(&token))
            .await?;
        assert_eq!(confirmed, ConfirmationOutcome::Confirmed);
        Ok(())
    }

    #[tokio::test]
    async fn resend_is_a_noop_for_unknown_or_confirmed_addresses() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let workflow = workflow(store, sender.clone());

        assert_eq!(
            workflow
                .resend_confirmation("nobody@example.com", &base())
                .await?,
            ResendOutcome::Noop
        );
        assert_eq!(
            workflow.resend_confirmation("not-an-email", &base()).await?,
            ResendOutcome::Noop
        );

        let outcome = workflow
            .register("ivan@example.com", &secret("hunter2-str0ng"), &base())
            .await?;
        let RegistrationOutcome::ConfirmationSent { account_id, link } = outcome else {
            panic!("expected a confirmation link");
        };
        let (_, token) = link_params(&link);
        workflow
            .confirm_email(Some(&account_id.to_string()), Some(&token))
            .await?;

        assert_eq!(
            workflow
                .resend_confirmation("ivan@example.com", &base())
                .await?,
            ResendOutcome::Noop
        );
        // Only the original registration email went out.
        assert_eq!(sender.sent.lock().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn logout_always_lands_on_the_default() -> Result<()> {
        let store = Arc::new(MemoryIdentityStore::new());
        let sender = Arc::new(RecordingSender::default());
        let config = WorkflowConfig::new(base()).with_default_landing("/welcome".to_string());
        let workflow = AuthWorkflow::new(store, sender, config);

        assert_eq!(workflow.logout(None).await, "/welcome");
        Ok(())
    }

    #[test]
    fn confirmation_link_joins_base_and_query() {
        let base = Url::parse("http://localhost:8080").unwrap();
        let id = AccountId::generate();
        let token = ConfirmationToken::new("tok-123".to_string());
        let link = confirmation_link(&base, id, &token).unwrap();
        assert_eq!(
            link,
            format!("http://localhost:8080/v1/auth/confirm-email?user_id={id}&token=tok-123")
        );
    }

    #[test]
    fn cookie_secure_follows_the_scheme() {
        let https = WorkflowConfig::new(Url::parse("https://accounts.example").unwrap());
        assert!(https.session_cookie_secure());
        let http = WorkflowConfig::new(Url::parse("http://localhost:8080").unwrap());
        assert!(!http.session_cookie_secure());
    }

    fn extract_href(html_body: &str) -> String {
        let start = html_body.find("href=\"").map(|idx| idx + 6).unwrap();
        let end = html_body[start..].find('"').map(|idx| start + idx).unwrap();
        html_body[start..end].to_string()
    }
}
