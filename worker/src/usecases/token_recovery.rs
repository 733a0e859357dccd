use std::sync::Arc;

use billing_core::{
    domain::{
        entities::subscriptions::SubscriptionEntity,
        repositories::{payments::PaymentRepository, subscriptions::SubscriptionRepository},
        value_objects::gateway::{ChargeReceipt, StoredInstrumentCharge},
    },
    payments::{errors::GatewayError, gateway::PaymentGateway},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::billing_run::BillingError;

#[derive(Debug)]
pub enum RecoveryOutcome {
    /// The retry with `instrument_ref` went through; the subscription already points at it.
    Recovered {
        receipt: ChargeReceipt,
        instrument_ref: String,
    },
    /// No usable alternate, or the single retry failed. `error` is what the caller should act on.
    Unrecoverable { error: GatewayError },
}

/// Re-derives a chargeable reference from payment history after the gateway reports
/// that the stored one no longer resolves, then retries the charge exactly once.
pub struct TokenRecoveryUseCase {
    subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
    payments: Arc<dyn PaymentRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway>,
}

impl TokenRecoveryUseCase {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
        payments: Arc<dyn PaymentRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            gateway,
        }
    }

    pub async fn recover_and_retry(
        &self,
        subscription: &SubscriptionEntity,
        failed_charge: StoredInstrumentCharge,
        original: GatewayError,
    ) -> Result<RecoveryOutcome, BillingError> {
        let failing_ref = failed_charge.parent_order_id.clone();

        let candidate = self
            .payments
            .find_latest_completed_with_instrument_ref(subscription.user_id, &failing_ref)
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    user_id = %subscription.user_id,
                    db_error = ?err,
                    "token_recovery: failed to query payment history"
                );
                BillingError::Ledger(err)
            })?;

        let Some(payment) = candidate else {
            warn!(
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                "token_recovery: no completed payment offers an alternate reference"
            );
            return Ok(RecoveryOutcome::Unrecoverable { error: original });
        };

        let alternate = match payment.instrument_ref_excluding(&failing_ref) {
            Some(reference) if is_gateway_order_id(reference) => reference.to_string(),
            other => {
                warn!(
                    subscription_id = %subscription.id,
                    payment_order_id = %payment.order_id,
                    candidate = ?other,
                    "token_recovery: alternate reference is not a gateway order id"
                );
                return Ok(RecoveryOutcome::Unrecoverable { error: original });
            }
        };

        self.subscriptions
            .replace_instrument_ref(subscription.id, &alternate)
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    db_error = ?err,
                    "token_recovery: failed to persist alternate reference"
                );
                BillingError::Store(err)
            })?;

        info!(
            subscription_id = %subscription.id,
            previous_ref = %failing_ref,
            instrument_ref = %alternate,
            source_order_id = %payment.order_id,
            "token_recovery: instrument reference replaced; retrying charge once"
        );

        let retry = StoredInstrumentCharge {
            parent_order_id: alternate.clone(),
            ..failed_charge
        };

        match self.gateway.charge_stored_instrument(retry).await {
            Ok(receipt) => Ok(RecoveryOutcome::Recovered {
                receipt,
                instrument_ref: alternate,
            }),
            // The original not-found error is surfaced whatever the retry failed with,
            // so the caller demotes instead of keeping an unconfirmed reference active.
            Err(err) => {
                warn!(
                    subscription_id = %subscription.id,
                    instrument_ref = %alternate,
                    kind = err.kind(),
                    error = %err,
                    "token_recovery: retry with alternate reference failed"
                );
                Ok(RecoveryOutcome::Unrecoverable { error: original })
            }
        }
    }
}

/// Gateway order ids are UUID-shaped. Anything else cannot be a saved-card reference.
pub fn is_gateway_order_id(value: &str) -> bool {
    Uuid::parse_str(value.trim()).is_ok()
}
