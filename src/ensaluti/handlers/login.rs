//! Password sign-in endpoint.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::session_cookie;
use crate::workflow::{AuthWorkflow, LoginOutcome, SignInDenial};

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    #[schema(value_type = String, format = Password)]
    pub password: SecretString,
    #[serde(default)]
    pub remember_me: bool,
    /// Optional local path to land on after sign-in.
    #[serde(default)]
    pub return_to: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 303, description = "Signed in; redirect target in Location"),
        (status = 401, description = "Invalid credentials or pending second factor", body = String),
        (status = 403, description = "Sign-in not allowed for this account", body = String),
        (status = 423, description = "Account temporarily locked", body = String),
    ),
    tag = "auth"
)]
pub async fn login(
    workflow: Extension<Arc<AuthWorkflow>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match workflow
        .login(
            &request.username,
            &request.password,
            request.remember_me,
            request.return_to.as_deref(),
        )
        .await
    {
        Ok(LoginOutcome::SignedIn {
            session,
            redirect_to,
        }) => {
            let secure = workflow.config().session_cookie_secure();
            let mut headers = HeaderMap::new();
            if let Ok(cookie) = session_cookie(&session, request.remember_me, secure) {
                headers.insert(SET_COOKIE, cookie);
            }
            (headers, Redirect::to(&redirect_to)).into_response()
        }
        Ok(LoginOutcome::Denied(denial)) => {
            (denial_status(denial), denial.message().to_string()).into_response()
        }
        Err(err) => {
            error!("Sign-in failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sign-in failed".to_string(),
            )
                .into_response()
        }
    }
}

const fn denial_status(denial: SignInDenial) -> StatusCode {
    match denial {
        SignInDenial::LockedOut => StatusCode::LOCKED,
        SignInDenial::NotAllowed => StatusCode::FORBIDDEN,
        SignInDenial::RequiresTwoFactor | SignInDenial::InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
    }
}
