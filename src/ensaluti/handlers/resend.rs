//! Resend-confirmation endpoint.
//!
//! The response never varies with the outcome, so the endpoint cannot be
//! used to probe which addresses have accounts.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::request_origin;
use crate::workflow::AuthWorkflow;

pub const RESEND_NOTICE: &str = "If the address is registered, a confirmation email is on its way";

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResendConfirmationRequest {
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/resend-confirmation",
    request_body = ResendConfirmationRequest,
    responses(
        (status = 202, description = "Request accepted", body = String),
    ),
    tag = "auth"
)]
pub async fn resend_confirmation(
    headers: HeaderMap,
    workflow: Extension<Arc<AuthWorkflow>>,
    payload: Option<Json<ResendConfirmationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string());
    };

    let link_base = request_origin(&headers, workflow.config());

    if let Err(err) = workflow.resend_confirmation(&request.email, &link_base).await {
        error!("Could not resend confirmation: {err}");
    }

    (StatusCode::ACCEPTED, RESEND_NOTICE.to_string())
}
