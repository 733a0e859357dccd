use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserNotification {
    SubscriptionActivated {
        subscription_id: Uuid,
        plan_name: String,
        next_billing_date: DateTime<Utc>,
    },
    SubscriptionRenewed {
        subscription_id: Uuid,
        plan_name: String,
        amount_minor: i64,
        currency: String,
        next_billing_date: DateTime<Utc>,
    },
    SubscriptionSuspended {
        subscription_id: Uuid,
        plan_name: String,
    },
}

impl UserNotification {
    pub fn title(&self) -> &'static str {
        match self {
            UserNotification::SubscriptionActivated { .. } => "Subscription activated",
            UserNotification::SubscriptionRenewed { .. } => "Subscription renewed",
            UserNotification::SubscriptionSuspended { .. } => "Subscription payment problem",
        }
    }
}
