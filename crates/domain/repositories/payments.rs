use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payments::{NewPaymentEntity, PaymentEntity};
use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

/// Append-only payment ledger. Rows are only ever updated in their settlement fields.
#[automock]
#[async_trait]
pub trait PaymentRepository {
    async fn record_payment(&self, payment: NewPaymentEntity) -> Result<PaymentEntity>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentEntity>>;

    /// Most recent completed payment of `user_id` that offers an instrument reference
    /// other than `exclude_ref`.
    async fn find_latest_completed_with_instrument_ref(
        &self,
        user_id: Uuid,
        exclude_ref: &str,
    ) -> Result<Option<PaymentEntity>>;

    /// Idempotent: writing the same token twice is a no-op.
    async fn attach_instrument_token(&self, order_id: &str, token: &str) -> Result<()>;

    /// Moves a `pending` payment to `status`. Returns `false` when the payment was
    /// already terminal, which makes callback replays harmless.
    async fn settle_payment(
        &self,
        order_id: &str,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
    ) -> Result<bool>;
}
