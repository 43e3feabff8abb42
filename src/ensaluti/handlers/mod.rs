//! HTTP handlers and the helpers they share.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, HOST},
    HeaderMap, HeaderValue,
};
use url::Url;

use crate::store::{SessionToken, REMEMBER_SESSION_TTL_SECONDS};
use crate::workflow::WorkflowConfig;

pub mod confirm;
pub mod health;
pub mod login;
pub mod logout;
pub mod register;
pub mod resend;

const SESSION_COOKIE_NAME: &str = "ensaluti_session";

/// Origin for links in outbound emails, taken from the request so the link
/// matches however the caller reached us. Falls back to the configured base.
pub(crate) fn request_origin(headers: &HeaderMap, config: &WorkflowConfig) -> Url {
    let fallback = config.public_base_url().clone();
    let Some(host) = headers.get(HOST).and_then(|value| value.to_str().ok()) else {
        return fallback;
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_else(|| fallback.scheme());
    Url::parse(&format!("{scheme}://{host}")).unwrap_or(fallback)
}

/// Build a `HttpOnly` cookie for the session token. Only remembered sessions
/// get a `Max-Age`; the rest expire with the browser session.
pub(crate) fn session_cookie(
    session: &SessionToken,
    remember_me: bool,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax",
        token = session.as_str()
    );
    if remember_me {
        cookie.push_str(&format!("; Max-Age={REMEMBER_SESSION_TTL_SECONDS}"));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<SessionToken> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(SessionToken::new(token));
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
            continue;
        };
        if key.trim() == SESSION_COOKIE_NAME {
            return Some(SessionToken::new(val.trim().to_string()));
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
