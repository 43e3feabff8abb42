//! Sign-out endpoint. Always lands on the configured page, session or not.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Redirect},
};
use std::sync::Arc;

use super::{clear_session_cookie, extract_session_token};
use crate::workflow::AuthWorkflow;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 303, description = "Signed out; redirects to the landing page"),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    workflow: Extension<Arc<AuthWorkflow>>,
) -> impl IntoResponse {
    let session = extract_session_token(&headers);
    let landing = workflow.logout(session).await;

    let secure = workflow.config().session_cookie_secure();
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(secure) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (response_headers, Redirect::to(&landing))
}
