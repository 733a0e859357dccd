use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::payments},
};
use domain::{
    entities::payments::{NewPaymentEntity, PaymentEntity},
    repositories::payments::PaymentRepository,
    value_objects::enums::payment_statuses::PaymentStatus,
};

/// How far back the recovery lookup scans a user's completed payments.
const RECOVERY_SCAN_LIMIT: i64 = 25;

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn record_payment(&self, payment: NewPaymentEntity) -> Result<PaymentEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let recorded = insert_into(payments::table)
            .values(&payment)
            .returning(PaymentEntity::as_returning())
            .get_result::<PaymentEntity>(&mut conn)?;

        Ok(recorded)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = payments::table
            .filter(payments::order_id.eq(order_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_latest_completed_with_instrument_ref(
        &self,
        user_id: Uuid,
        exclude_ref: &str,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let candidates = payments::table
            .filter(payments::user_id.eq(user_id))
            .filter(payments::status.eq(PaymentStatus::Completed.as_str()))
            .order(payments::created_at.desc())
            .limit(RECOVERY_SCAN_LIMIT)
            .select(PaymentEntity::as_select())
            .load::<PaymentEntity>(&mut conn)?;

        Ok(candidates
            .into_iter()
            .find(|payment| payment.instrument_ref_excluding(exclude_ref).is_some()))
    }

    async fn attach_instrument_token(&self, order_id: &str, token: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(payments::table)
            .filter(payments::order_id.eq(order_id))
            .filter(
                payments::payment_token
                    .is_null()
                    .or(payments::payment_token.ne(token)),
            )
            .set((
                payments::payment_token.eq(Some(token)),
                payments::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn settle_payment(
        &self,
        order_id: &str,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(payments::table)
            .filter(payments::order_id.eq(order_id))
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .set((
                payments::status.eq(status.as_str()),
                payments::settled_at.eq(Some(settled_at)),
                payments::updated_at.eq(settled_at),
            ))
            .execute(&mut conn)?;

        Ok(updated == 1)
    }
}
