use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    billing_periods::BillingPeriod, subscription_statuses::SubscriptionStatus,
};
use crate::infra::db::postgres::schema::subscriptions;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_price_minor: i64,
    pub currency: String,
    pub period: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    /// Order whose payment first saved the card. Never rewritten.
    pub instrument_save_order_id: Option<String>,
    /// Reference sent as `parent_order_id` on recurring charges.
    pub chargeable_instrument_ref: Option<String>,
    pub payment_method: String,
    pub total_paid_minor: i64,
    pub billing_cycles: i32,
    pub billing_claimed_by: Option<String>,
    pub billing_claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }

    pub fn billing_period(&self) -> Option<BillingPeriod> {
        BillingPeriod::from_str(&self.period)
    }

    pub fn chargeable_ref(&self) -> Option<&str> {
        self.chargeable_instrument_ref
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    /// Eligible iff active, holding a chargeable reference, and due at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.chargeable_ref().is_some()
            && self.next_billing_date.is_some_and(|due| due <= now)
    }

    /// `next_billing_date` is present exactly when the subscription is active.
    pub fn billing_date_invariant_holds(&self) -> bool {
        (self.status() == SubscriptionStatus::Active) == self.next_billing_date.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub user_id: Uuid,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_price_minor: i64,
    pub currency: String,
    pub period: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub instrument_save_order_id: Option<String>,
    pub chargeable_instrument_ref: Option<String>,
    pub payment_method: String,
    pub total_paid_minor: i64,
    pub billing_cycles: i32,
}
