//! Order store: append-mostly; only the status field ever changes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use tradepost_core::{AggregateRoot, ExpectedVersion, OrderId, UserId};
use tradepost_orders::Order;

use super::StoreError;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a freshly placed order. `Conflict` if the id already exists.
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    /// Load one order. `None` if absent.
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Persist a status transition if the stored version still matches.
    async fn save(&self, order: Order, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// All orders placed by a user, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;
}

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let order_id = order.id_typed();
        if orders.contains_key(&order_id) {
            return Err(StoreError::conflict(format!("order {order_id} already exists")));
        }

        orders.insert(order_id, order);
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        Ok(orders.get(&order_id).cloned())
    }

    async fn save(&self, order: Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let order_id = order.id_typed();
        let current = orders
            .get(&order_id)
            .map(|o| o.version())
            .ok_or(StoreError::NotFound)?;

        if !expected.matches(current) {
            return Err(StoreError::conflict(format!(
                "order {order_id}: expected {expected:?}, found {current}"
            )));
        }

        orders.insert(order_id, order);
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let mut result: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id() == Some(user_id))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.placed_at().cmp(&a.placed_at()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tradepost_core::{Aggregate, ProductId};
    use tradepost_orders::{OrderCommand, OrderLine, PlaceOrder};

    fn placed_order(user_id: UserId) -> Order {
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        let events = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id,
                lines: vec![OrderLine {
                    product_id: ProductId::new(),
                    product_name: "Walnut desk".to_string(),
                    quantity: 1,
                    unit_price: 12_900,
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let store = InMemoryOrderStore::new();
        let order = placed_order(UserId::new());

        store.insert(order.clone()).await.unwrap();
        let err = store.insert(order).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn list_for_user_filters_and_orders_newest_first() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();

        let first = placed_order(user_id);
        let second = placed_order(user_id);
        let other = placed_order(UserId::new());

        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();
        store.insert(other).await.unwrap();

        let listed = store.list_for_user(user_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].placed_at() >= listed[1].placed_at());
    }

    #[tokio::test]
    async fn save_requires_matching_version() {
        let store = InMemoryOrderStore::new();
        let order = placed_order(UserId::new());
        store.insert(order.clone()).await.unwrap();

        let err = store
            .save(order, ExpectedVersion::Exact(99))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
