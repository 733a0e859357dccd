use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use billing_core::payments::callback_signature::SIGNATURE_HEADER;
use chrono::Utc;
use serde_json::json;
use tracing::{error, warn};

use crate::usecases::gateway_callback::{CallbackError, CallbackOutcome, GatewayCallbackUseCase};

pub fn routes(usecase: Arc<GatewayCallbackUseCase>) -> Router {
    Router::new()
        .route("/notify", post(notify))
        .with_state(usecase)
}

/// Raw body is taken as bytes because the signature covers the exact payload.
pub async fn notify(
    State(usecase): State<Arc<GatewayCallbackUseCase>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match usecase.handle(&body, signature, Utc::now()).await {
        Ok(outcome) => {
            let result = match outcome {
                CallbackOutcome::AlreadySettled => "already_settled",
                CallbackOutcome::StillPending => "pending",
                CallbackOutcome::Settled { .. } => "settled",
            };
            (StatusCode::OK, Json(json!({ "result": result }))).into_response()
        }
        Err(err) => map_error(err),
    }
}

fn map_error(err: CallbackError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "gateway_callback: handler failed");
    } else {
        warn!(error = %err, "gateway_callback: notification rejected");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
