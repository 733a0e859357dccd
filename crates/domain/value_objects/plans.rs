use serde::{Deserialize, Serialize};

use crate::domain::value_objects::enums::billing_periods::BillingPeriod;

/// Plan terms captured at checkout. Stored as JSONB on the initial payment so the
/// subscription can be created from the settlement callback alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSnapshot {
    pub plan_id: String,
    pub plan_name: String,
    pub price_minor: i64,
    pub currency: String,
    pub period: BillingPeriod,
}
