use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Payment context for the user-redirected checkout that saves the card.
pub const CONTEXT_SUBSCRIPTION: &str = "subscription";
/// Payment context for scheduler-initiated charges against a saved card.
pub const CONTEXT_RECURRING: &str = "recurring";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// Gateway accepted the charge; the ledger row stays `pending` until the callback.
    Charged {
        order_id: String,
        next_billing_date: DateTime<Utc>,
        recovered: bool,
    },
    /// Subscription moved to `pending`; it will not renew until reactivated.
    Demoted { reason: String },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotDue,
    ClaimedElsewhere,
    GatewayAuthUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingRunSummary {
    pub due: usize,
    pub charged: usize,
    pub recovered: usize,
    pub demoted: usize,
    pub skipped: usize,
    pub persistence_errors: usize,
    pub charged_ids: Vec<Uuid>,
    pub demoted_ids: Vec<Uuid>,
}

impl BillingRunSummary {
    pub fn record(&mut self, subscription_id: Uuid, outcome: &ChargeOutcome) {
        match outcome {
            ChargeOutcome::Charged { recovered, .. } => {
                self.charged += 1;
                if *recovered {
                    self.recovered += 1;
                }
                self.charged_ids.push(subscription_id);
            }
            ChargeOutcome::Demoted { .. } => {
                self.demoted += 1;
                self.demoted_ids.push(subscription_id);
            }
            ChargeOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}
