use async_trait::async_trait;
use common::{CartId, OrderId};

use crate::Result;
use crate::types::{OrderLine, OrderStatus};

/// Interface the reservation flows consume from the order collaborator.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates a PENDING order with its line items; returns the order ID.
    async fn create_order(&self, cart_id: &CartId, items: &[OrderLine]) -> Result<OrderId>;

    /// Line items of an order; empty if the order does not exist.
    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderLine>>;

    /// The cart that placed an order, if the order exists.
    async fn get_order_cart_id(&self, order_id: OrderId) -> Result<Option<CartId>>;

    /// Updates an order's status.
    async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()>;
}
