use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};
use domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    repositories::subscriptions::SubscriptionRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_due_for_billing(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = subscriptions::table
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(subscriptions::chargeable_instrument_ref.is_not_null())
            .filter(subscriptions::chargeable_instrument_ref.ne(""))
            .filter(subscriptions::next_billing_date.le(now))
            .filter(
                subscriptions::billing_claimed_until
                    .is_null()
                    .or(subscriptions::billing_claimed_until.lt(now)),
            )
            .order(subscriptions::next_billing_date.asc())
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(results)
    }

    async fn claim_for_billing(
        &self,
        subscription_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Conditional stamp: only one worker can flip an unclaimed, still-due row.
        let claimed = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(subscriptions::next_billing_date.le(now))
            .filter(
                subscriptions::billing_claimed_until
                    .is_null()
                    .or(subscriptions::billing_claimed_until.lt(now)),
            )
            .set((
                subscriptions::billing_claimed_by.eq(Some(worker_id)),
                subscriptions::billing_claimed_until.eq(Some(claim_until)),
                subscriptions::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(claimed == 1)
    }

    async fn release_claim(&self, subscription_id: Uuid, worker_id: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::billing_claimed_by.eq(worker_id))
            .set((
                subscriptions::billing_claimed_by.eq::<Option<String>>(None),
                subscriptions::billing_claimed_until.eq::<Option<DateTime<Utc>>>(None),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn advance_billing_cycle(
        &self,
        subscription_id: Uuid,
        charged_amount_minor: i64,
        new_next_billing_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .set((
                subscriptions::billing_cycles.eq(subscriptions::billing_cycles + 1),
                subscriptions::total_paid_minor
                    .eq(subscriptions::total_paid_minor + charged_amount_minor),
                subscriptions::next_billing_date.eq(Some(new_next_billing_date)),
                subscriptions::billing_claimed_by.eq::<Option<String>>(None),
                subscriptions::billing_claimed_until.eq::<Option<DateTime<Utc>>>(None),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            bail!("subscription {subscription_id} is not active; billing cycle not advanced");
        }

        Ok(())
    }

    async fn mark_pending(&self, subscription_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .set((
                subscriptions::status.eq(SubscriptionStatus::Pending.as_str()),
                subscriptions::next_billing_date.eq::<Option<DateTime<Utc>>>(None),
                subscriptions::billing_claimed_by.eq::<Option<String>>(None),
                subscriptions::billing_claimed_until.eq::<Option<DateTime<Utc>>>(None),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn replace_instrument_ref(&self, subscription_id: Uuid, new_ref: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .set((
                subscriptions::chargeable_instrument_ref.eq(Some(new_ref)),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            bail!("subscription {subscription_id} not found");
        }

        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<SubscriptionEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let created = insert_into(subscriptions::table)
            .values(&subscription)
            .returning(SubscriptionEntity::as_returning())
            .get_result::<SubscriptionEntity>(&mut conn)?;

        Ok(created)
    }

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .find(subscription_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_instrument_save_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::instrument_save_order_id.eq(order_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn reactivate(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Pending.as_str()))
            .set((
                subscriptions::status.eq(SubscriptionStatus::Active.as_str()),
                subscriptions::next_billing_date.eq(Some(next_billing_date)),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(updated == 1)
    }

    async fn cancel(&self, subscription_id: Uuid, cancelled_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::status.eq_any([
                SubscriptionStatus::Active.as_str(),
                SubscriptionStatus::Pending.as_str(),
            ]))
            .set((
                subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
                subscriptions::next_billing_date.eq::<Option<DateTime<Utc>>>(None),
                subscriptions::end_date.eq(Some(cancelled_at)),
                subscriptions::billing_claimed_by.eq::<Option<String>>(None),
                subscriptions::billing_claimed_until.eq::<Option<DateTime<Utc>>>(None),
                subscriptions::updated_at.eq(cancelled_at),
            ))
            .execute(&mut conn)?;

        Ok(updated == 1)
    }

    async fn count_by_status(&self, status: SubscriptionStatus) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = subscriptions::table
            .filter(subscriptions::status.eq(status.as_str()))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }
}
