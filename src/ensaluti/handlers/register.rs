//! Account registration endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::request_origin;
use crate::workflow::{AuthWorkflow, FieldError, RegistrationOutcome};

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    #[schema(value_type = String, format = Password)]
    pub password: SecretString,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RegisterResponse {
    pub account_id: String,
    /// The confirmation link also travels by email; it is echoed here for
    /// API clients driving the flow themselves.
    pub confirmation_link: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; confirmation email sent", body = RegisterResponse),
        (status = 422, description = "Registration rejected", body = [FieldError]),
        (status = 502, description = "Account created but the confirmation email could not be sent", body = String),
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    workflow: Extension<Arc<AuthWorkflow>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let link_base = request_origin(&headers, workflow.config());

    match workflow
        .register(&request.email, &request.password, &link_base)
        .await
    {
        Ok(RegistrationOutcome::ConfirmationSent { account_id, link }) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                account_id: account_id.to_string(),
                confirmation_link: link,
            }),
        )
            .into_response(),
        Ok(RegistrationOutcome::Rejected(errors)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response()
        }
        Ok(RegistrationOutcome::DeliveryFailed) => {
            (StatusCode::BAD_GATEWAY, "Could not send email".to_string()).into_response()
        }
        Err(err) => {
            error!("Registration failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}
