use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::gateway::{
    ChargeReceipt, CreatedOrder, OrderRequest, OrderStatusReport, StoredInstrumentCharge,
};

use super::errors::GatewayError;

/// Order-based payment API of the external gateway.
#[automock]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// One-time, user-redirected order. Not used by recurring billing.
    async fn create_order(&self, request: OrderRequest) -> Result<CreatedOrder, GatewayError>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, GatewayError>;

    /// Charges the card saved under `charge.parent_order_id`, producing a new order id.
    /// An unresolvable parent order surfaces as [`GatewayError::InstrumentNotFound`].
    async fn charge_stored_instrument(
        &self,
        charge: StoredInstrumentCharge,
    ) -> Result<ChargeReceipt, GatewayError>;
}
