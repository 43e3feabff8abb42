//! Email confirmation endpoint, the target of the emailed link.

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::IntoParams;

use crate::workflow::{AuthWorkflow, ConfirmationOutcome};

/// Query parameters carried by the confirmation link. Both are optional so
/// that mangled links reach the handler instead of a generic 400.
#[derive(Deserialize, IntoParams, Debug)]
pub struct ConfirmEmailParams {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/auth/confirm-email",
    params(ConfirmEmailParams),
    responses(
        (status = 200, description = "Email confirmed", body = String),
        (status = 400, description = "Unable to confirm email", body = String),
    ),
    tag = "auth"
)]
pub async fn confirm_email(
    workflow: Extension<Arc<AuthWorkflow>>,
    Query(params): Query<ConfirmEmailParams>,
) -> impl IntoResponse {
    match workflow
        .confirm_email(params.user_id.as_deref(), params.token.as_deref())
        .await
    {
        Ok(ConfirmationOutcome::Confirmed) => (StatusCode::OK, "Email confirmed".to_string()),
        Ok(ConfirmationOutcome::Error) => (
            StatusCode::BAD_REQUEST,
            "Unable to confirm email".to_string(),
        ),
        Err(err) => {
            error!("Email confirmation failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to confirm email".to_string(),
            )
        }
    }
}
