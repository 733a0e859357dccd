use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use billing_core::domain::value_objects::plans::PlanSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use super::internal_auth::authorize_internal;
use crate::{
    config::config_model::DotEnvyConfig,
    usecases::{
        checkout::{CheckoutBuyer, SubscriptionCheckoutUseCase},
        reactivation::SubscriptionReactivationUseCase,
    },
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/subscriptions/$ID/reactivate" \
//     -H "Authorization: Bearer $INTERNAL_API_TOKEN"

#[derive(Clone)]
pub struct SubscriptionsAdminState {
    config: Arc<DotEnvyConfig>,
    checkout: Arc<SubscriptionCheckoutUseCase>,
    reactivation: Arc<SubscriptionReactivationUseCase>,
}

pub fn routes(
    config: Arc<DotEnvyConfig>,
    checkout: Arc<SubscriptionCheckoutUseCase>,
    reactivation: Arc<SubscriptionReactivationUseCase>,
) -> Router {
    Router::new()
        .route("/checkout", post(start_checkout))
        .route("/:subscription_id/reactivate", post(reactivate))
        .route("/:subscription_id/cancel", post(cancel))
        .with_state(SubscriptionsAdminState {
            config,
            checkout,
            reactivation,
        })
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub plan: PlanSnapshot,
    pub buyer_email: Option<String>,
    pub customer_ip: String,
}

#[derive(Debug, Serialize)]
pub struct ReactivateResponse {
    pub subscription_id: Uuid,
    pub next_billing_date: DateTime<Utc>,
}

pub async fn start_checkout(
    State(state): State<SubscriptionsAdminState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Response {
    if let Err(response) = authorize_internal(&state.config.internal_api, &headers) {
        return response;
    }

    let buyer = CheckoutBuyer {
        email: payload.buyer_email,
        customer_ip: payload.customer_ip,
    };

    match state
        .checkout
        .start_checkout(payload.user_id, payload.plan, buyer)
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => {
            error_response("checkout", err.status_code(), &err)
        }
    }
}

pub async fn reactivate(
    State(state): State<SubscriptionsAdminState>,
    headers: HeaderMap,
    Path(subscription_id): Path<Uuid>,
) -> Response {
    if let Err(response) = authorize_internal(&state.config.internal_api, &headers) {
        return response;
    }

    match state.reactivation.reactivate(subscription_id, Utc::now()).await {
        Ok(next_billing_date) => Json(ReactivateResponse {
            subscription_id,
            next_billing_date,
        })
        .into_response(),
        Err(err) => {
            error_response("reactivate", err.status_code(), &err)
        }
    }
}

pub async fn cancel(
    State(state): State<SubscriptionsAdminState>,
    headers: HeaderMap,
    Path(subscription_id): Path<Uuid>,
) -> Response {
    if let Err(response) = authorize_internal(&state.config.internal_api, &headers) {
        return response;
    }

    match state.reactivation.cancel(subscription_id, Utc::now()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error_response("cancel", err.status_code(), &err)
        }
    }
}

fn error_response(operation: &'static str, status: StatusCode, err: &dyn std::error::Error) -> Response {
    if status.is_server_error() {
        error!(operation, error = %err, "subscriptions_admin: request failed");
    } else {
        warn!(operation, error = %err, "subscriptions_admin: request rejected");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
