use axum::{
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};

use crate::config::config_model::InternalApi;

/// Gate for operator endpoints. Answers 503 while `INTERNAL_API_TOKEN` is unset so the
/// endpoints are never reachable unauthenticated.
pub fn authorize_internal(internal_api: &InternalApi, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected_token) = internal_api.token.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "internal api token is not configured",
        )
            .into_response());
    };

    authorize_bearer(headers, expected_token)
        .map_err(|status| (status, "unauthorized").into_response())
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
