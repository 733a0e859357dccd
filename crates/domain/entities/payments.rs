use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::{enums::payment_statuses::PaymentStatus, plans::PlanSnapshot};
use crate::infra::db::postgres::schema::payments;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: String,
    pub context: String,
    pub is_recurring: bool,
    pub parent_order_id: Option<String>,
    pub external_order_id: Option<String>,
    pub recurring_payment_id: Option<Uuid>,
    pub payment_token: Option<String>,
    pub plan_snapshot: Option<serde_json::Value>,
    pub status: String,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentEntity {
    pub fn status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_str(&self.status)
    }

    pub fn plan(&self) -> Option<PlanSnapshot> {
        self.plan_snapshot
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Picks the reference this payment offers for future recurring charges, skipping
    /// `exclude`. Order of preference: `parent_order_id`, then `payment_token`, then
    /// the payment's own `order_id`.
    pub fn instrument_ref_excluding(&self, exclude: &str) -> Option<&str> {
        [
            self.parent_order_id.as_deref(),
            self.payment_token.as_deref(),
            Some(self.order_id.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty() && *candidate != exclude)
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = payments)]
pub struct InsertPaymentEntity {
    pub user_id: Uuid,
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: String,
    pub context: String,
    pub is_recurring: bool,
    pub parent_order_id: Option<String>,
    pub external_order_id: Option<String>,
    pub recurring_payment_id: Option<Uuid>,
    pub payment_token: Option<String>,
    pub plan_snapshot: Option<serde_json::Value>,
    pub status: String,
}

// NewPaymentEntity is the application-facing alias for inserting rows into `payments`.
pub type NewPaymentEntity = InsertPaymentEntity;
