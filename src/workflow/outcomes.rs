//! Typed outcomes the workflow hands back to its callers.

use serde::Serialize;
use utoipa::ToSchema;

use crate::store::{AccountId, PolicyViolation, SessionToken};

/// Outcome of a sign-in attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    SignedIn {
        session: SessionToken,
        redirect_to: String,
    },
    Denied(SignInDenial),
}

/// Why a sign-in was denied. The message is the full verdict; no variant
/// reveals whether the username exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignInDenial {
    LockedOut,
    NotAllowed,
    RequiresTwoFactor,
    InvalidCredentials,
}

impl SignInDenial {
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::LockedOut => "Locked out",
            Self::NotAllowed => "Not allowed",
            Self::RequiresTwoFactor => "Requires two-factor authentication",
            Self::InvalidCredentials => "Invalid username or password.",
        }
    }
}

/// One user-facing validation message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    /// Field the message belongs to; empty for form-level messages.
    pub field: String,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn form_level(message: impl Into<String>) -> Self {
        Self {
            field: String::new(),
            message: message.into(),
        }
    }
}

impl From<PolicyViolation> for FieldError {
    fn from(violation: PolicyViolation) -> Self {
        Self::form_level(violation.description)
    }
}

/// Outcome of a registration attempt.
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// Account exists and the confirmation email went out.
    ConfirmationSent { account_id: AccountId, link: String },
    Rejected(Vec<FieldError>),
    /// Account exists but the email could not be delivered; a resend can
    /// finish the job later.
    DeliveryFailed,
}

/// Outcome of an email confirmation attempt. Missing parameters, unknown
/// accounts and bad tokens all collapse into `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Error,
}

/// Outcome of a confirmation resend. Callers surface all three the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Queued,
    Noop,
    SendFailed,
}
