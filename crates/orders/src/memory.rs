use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CartId, OrderId};
use tokio::sync::RwLock;

use crate::Result;
use crate::store::OrderStore;
use crate::types::{OrderLine, OrderStatus};

#[derive(Debug, Clone)]
struct StoredOrder {
    cart_id: CartId,
    status: OrderStatus,
    items: Vec<OrderLine>,
}

/// In-memory order store for testing and infrastructure-free runs.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, StoredOrder>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of an order, if it exists.
    pub async fn status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.orders.read().await.get(&order_id).map(|o| o.status)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, cart_id: &CartId, items: &[OrderLine]) -> Result<OrderId> {
        let order_id = OrderId::new();
        self.orders.write().await.insert(
            order_id,
            StoredOrder {
                cart_id: cart_id.clone(),
                status: OrderStatus::Pending,
                items: items.to_vec(),
            },
        );
        Ok(order_id)
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        Ok(self
            .orders
            .read()
            .await
            .get(&order_id)
            .map(|o| o.items.clone())
            .unwrap_or_default())
    }

    async fn get_order_cart_id(&self, order_id: OrderId) -> Result<Option<CartId>> {
        Ok(self
            .orders
            .read()
            .await
            .get(&order_id)
            .map(|o| o.cart_id.clone()))
    }

    async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        if let Some(order) = self.orders.write().await.get_mut(&order_id) {
            order.status = status;
        }
        Ok(())
    }
}
