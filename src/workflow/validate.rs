//! Email syntax validation with a hard time cap on the match.

use regex::Regex;
use std::time::Duration;
use tracing::warn;

/// Upper bound on a single syntax check, cap included in the contract so a
/// hostile input can never stall registration.
pub(crate) const EMAIL_MATCH_CAP: Duration = Duration::from_millis(250);

/// RFC 5321 limit on the forward path; longer inputs are rejected outright.
const MAX_EMAIL_BYTES: usize = 254;

/// Dotted-atom local part, hyphen-safe domain labels, alphanumeric TLD of
/// 2 to 24 characters. Case-insensitive.
const EMAIL_GRAMMAR: &str = r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z0-9][a-z0-9-]{0,22}[a-z0-9]$";

/// Syntax check for candidate registration emails.
///
/// A check that exceeds the time cap counts as invalid; the address can be
/// resubmitted and the caller never blocks past the cap.
pub(crate) async fn valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_BYTES {
        return false;
    }
    match_with_cap(email.to_string(), EMAIL_MATCH_CAP, |candidate| {
        Regex::new(EMAIL_GRAMMAR).is_ok_and(|grammar| grammar.is_match(candidate))
    })
    .await
}

/// Run `matcher` off the async runtime and give it at most `cap`.
pub(crate) async fn match_with_cap<F>(input: String, cap: Duration, matcher: F) -> bool
where
    F: FnOnce(&str) -> bool + Send + 'static,
{
    let matched = tokio::time::timeout(cap, tokio::task::spawn_blocking(move || matcher(&input)));
    match matched.await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(err)) => {
            warn!("email syntax check panicked: {err}");
            false
        }
        Err(_) => {
            warn!("email syntax check exceeded its time cap");
            false
        }
    }
}
