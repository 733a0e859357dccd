use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity};
use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

/// Authoritative store for subscription lifecycle and billing-date bookkeeping.
///
/// Implementations keep `next_billing_date` set if and only if the status is
/// `active`; every transition out of `active` clears it.
#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    /// Active subscriptions with a chargeable reference and `next_billing_date <= now`,
    /// oldest-due first. Rows carrying a live billing claim are left out.
    async fn find_due_for_billing(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionEntity>>;

    /// Stamps the row for `worker_id` until `claim_until`. Returns `false` when the row
    /// is no longer due or another worker holds a live claim.
    async fn claim_for_billing(
        &self,
        subscription_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release_claim(&self, subscription_id: Uuid, worker_id: &str) -> Result<()>;

    /// Single-statement increment of `billing_cycles` and `total_paid_minor` plus the
    /// new `next_billing_date`. Also clears the billing claim.
    async fn advance_billing_cycle(
        &self,
        subscription_id: Uuid,
        charged_amount_minor: i64,
        new_next_billing_date: DateTime<Utc>,
    ) -> Result<()>;

    /// `active -> pending`, clearing `next_billing_date` and the claim.
    async fn mark_pending(&self, subscription_id: Uuid) -> Result<()>;

    async fn replace_instrument_ref(&self, subscription_id: Uuid, new_ref: &str) -> Result<()>;

    async fn create_subscription(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<SubscriptionEntity>;

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_instrument_save_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// `pending -> active` with the given due date. Returns `false` if the row was not pending.
    async fn reactivate(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<bool>;

    /// `active|pending -> cancelled`. Returns `false` if already terminal.
    async fn cancel(&self, subscription_id: Uuid, cancelled_at: DateTime<Utc>) -> Result<bool>;

    async fn count_by_status(&self, status: SubscriptionStatus) -> Result<i64>;
}
