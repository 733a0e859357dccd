use std::sync::Arc;

use billing_core::{
    domain::{
        entities::payments::NewPaymentEntity,
        repositories::payments::PaymentRepository,
        value_objects::{
            billing::CONTEXT_SUBSCRIPTION,
            enums::{payment_methods::PaymentMethod, payment_statuses::PaymentStatus},
            gateway::OrderRequest,
            plans::PlanSnapshot,
        },
    },
    payments::{errors::GatewayError, gateway::PaymentGateway},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid plan: {0}")]
    InvalidPlan(&'static str),
    #[error("gateway refused the order: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckoutError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CheckoutError::InvalidPlan(_) => StatusCode::BAD_REQUEST,
            CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutBuyer {
    pub email: Option<String>,
    pub customer_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub order_id: String,
    pub external_order_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub notify_url: String,
    pub continue_url: Option<String>,
}

/// Starts the card-saving checkout whose settlement callback activates the subscription.
pub struct SubscriptionCheckoutUseCase {
    payments: Arc<dyn PaymentRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl SubscriptionCheckoutUseCase {
    pub fn new(
        payments: Arc<dyn PaymentRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            payments,
            gateway,
            settings,
        }
    }

    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        plan: PlanSnapshot,
        buyer: CheckoutBuyer,
    ) -> Result<CheckoutSession, CheckoutError> {
        validate_plan(&plan)?;

        let external_order_id = format!("{user_id}-{}", Uuid::new_v4().simple());
        let created = self
            .gateway
            .create_order(OrderRequest {
                external_order_id: external_order_id.clone(),
                description: format!("{} subscription", plan.plan_name),
                currency: plan.currency.clone(),
                total_amount_minor: plan.price_minor,
                customer_ip: buyer.customer_ip,
                buyer_email: buyer.email,
                notify_url: self.settings.notify_url.clone(),
                continue_url: self.settings.continue_url.clone(),
                save_instrument: true,
            })
            .await?;

        let plan_snapshot = serde_json::to_value(&plan)
            .map_err(|err| anyhow::anyhow!("plan snapshot could not be encoded: {err}"))?;

        self.payments
            .record_payment(NewPaymentEntity {
                user_id,
                order_id: created.order_id.clone(),
                amount_minor: plan.price_minor,
                currency: plan.currency.clone(),
                payment_method: PaymentMethod::Card.to_string(),
                context: CONTEXT_SUBSCRIPTION.to_string(),
                is_recurring: false,
                parent_order_id: None,
                external_order_id: Some(external_order_id.clone()),
                recurring_payment_id: None,
                payment_token: None,
                plan_snapshot: Some(plan_snapshot),
                status: PaymentStatus::Pending.to_string(),
            })
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    order_id = %created.order_id,
                    db_error = ?err,
                    "checkout: failed to record checkout payment"
                );
                err
            })?;

        info!(
            %user_id,
            order_id = %created.order_id,
            plan_id = %plan.plan_id,
            "checkout: order created"
        );

        Ok(CheckoutSession {
            order_id: created.order_id,
            external_order_id,
            redirect_url: created.redirect_url,
        })
    }
}

fn validate_plan(plan: &PlanSnapshot) -> Result<(), CheckoutError> {
    if plan.plan_id.trim().is_empty() {
        return Err(CheckoutError::InvalidPlan("plan_id is required"));
    }
    if plan.price_minor <= 0 {
        return Err(CheckoutError::InvalidPlan("price must be positive"));
    }
    if plan.currency.len() != 3 || !plan.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(CheckoutError::InvalidPlan("currency must be a 3-letter ISO code"));
    }
    Ok(())
}
