use serde::{Deserialize, Serialize};

/// One-time, user-redirected order. `save_instrument` asks the gateway to keep the
/// card for later recurring charges against the resulting order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub external_order_id: String,
    pub description: String,
    pub currency: String,
    pub total_amount_minor: i64,
    pub customer_ip: String,
    pub buyer_email: Option<String>,
    pub notify_url: String,
    pub continue_url: Option<String>,
    pub save_instrument: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: String,
    pub redirect_url: String,
}

/// Settlement state as reported by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Pending,
    WaitingForConfirmation,
    Completed,
    Canceled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(OrderStatus::New),
            "PENDING" => Some(OrderStatus::Pending),
            "WAITING_FOR_CONFIRMATION" => Some(OrderStatus::WaitingForConfirmation),
            "COMPLETED" => Some(OrderStatus::Completed),
            "CANCELED" | "CANCELLED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub detail: Option<String>,
}

/// "Charge the instrument saved under `parent_order_id`", producing a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredInstrumentCharge {
    pub parent_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub external_order_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub order_id: String,
}
