use std::sync::Arc;

use billing_core::domain::{
    repositories::subscriptions::SubscriptionRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReactivationError {
    #[error("subscription not found")]
    NotFound,
    #[error("subscription is {0}")]
    InvalidState(SubscriptionStatus),
    #[error("subscription has no chargeable instrument reference")]
    MissingInstrument,
    #[error("subscription changed while being updated")]
    Conflict,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ReactivationError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ReactivationError::NotFound => StatusCode::NOT_FOUND,
            ReactivationError::InvalidState(_) | ReactivationError::Conflict => {
                StatusCode::CONFLICT
            }
            ReactivationError::MissingInstrument => StatusCode::UNPROCESSABLE_ENTITY,
            ReactivationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Manual exits from `pending`. Nothing re-promotes a demoted subscription automatically.
pub struct SubscriptionReactivationUseCase {
    subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
}

impl SubscriptionReactivationUseCase {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>) -> Self {
        Self { subscriptions }
    }

    /// `pending -> active`, due immediately so the next run charges it.
    pub async fn reactivate(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ReactivationError> {
        let subscription = self
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .ok_or(ReactivationError::NotFound)?;

        let status = subscription.status();
        if status != SubscriptionStatus::Pending {
            return Err(ReactivationError::InvalidState(status));
        }
        if subscription.chargeable_ref().is_none() {
            return Err(ReactivationError::MissingInstrument);
        }

        if !self.subscriptions.reactivate(subscription_id, now).await? {
            warn!(%subscription_id, "reactivation: subscription left pending concurrently");
            return Err(ReactivationError::Conflict);
        }

        info!(%subscription_id, next_billing_date = %now, "reactivation: subscription reactivated");
        Ok(now)
    }

    /// `active|pending -> cancelled`.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ReactivationError> {
        let subscription = self
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .ok_or(ReactivationError::NotFound)?;

        if !self.subscriptions.cancel(subscription_id, now).await? {
            return Err(ReactivationError::InvalidState(subscription.status()));
        }

        info!(%subscription_id, "reactivation: subscription cancelled");
        Ok(())
    }
}
