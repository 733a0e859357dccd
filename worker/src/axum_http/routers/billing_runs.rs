use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use tracing::error;

use super::internal_auth::authorize_internal;
use crate::{config::config_model::DotEnvyConfig, usecases::billing_run::BillingRunUseCase};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/billing/run" \
//     -H "Authorization: Bearer $INTERNAL_API_TOKEN"

#[derive(Clone)]
pub struct BillingRunRouteState {
    config: Arc<DotEnvyConfig>,
    usecase: Arc<BillingRunUseCase>,
}

pub fn routes(config: Arc<DotEnvyConfig>, usecase: Arc<BillingRunUseCase>) -> Router {
    Router::new()
        .route("/run", post(trigger_run))
        .with_state(BillingRunRouteState { config, usecase })
}

pub async fn trigger_run(State(state): State<BillingRunRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize_internal(&state.config.internal_api, &headers) {
        return response;
    }

    // The run lives in its own task: a client disconnect drops this handler, and a run
    // must never stop between an accepted charge and its ledger write.
    let usecase = Arc::clone(&state.usecase);
    let run = tokio::spawn(async move { usecase.run(Utc::now()).await });

    match run.await {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(err)) => {
            error!(error = %err, "billing_runs: manual run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "billing run failed").into_response()
        }
        Err(err) => {
            error!(error = %err, "billing_runs: manual run task aborted");
            (StatusCode::INTERNAL_SERVER_ERROR, "billing run failed").into_response()
        }
    }
}
