//! Order reads and administrative status transitions.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use tradepost_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, OrderId, UserId};
use tradepost_orders::{Order, OrderCommand, OrderStatus};

use crate::publish::{SharedEventBus, publish_committed};
use crate::store::{CatalogStore, OrderStore, StoreError};

/// Policy knobs for order administration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderPolicy {
    /// Whether cancelling an order restores its stock. The default is no
    /// restock, matching the source system; enabling it is a deliberate
    /// configuration decision.
    pub restock_on_cancel: bool,
}

#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The order service. Orders are append-mostly: only the status field ever
/// changes, and only through the transitions the aggregate allows.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogStore>,
    bus: SharedEventBus,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogStore>,
        bus: SharedEventBus,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            orders,
            catalog,
            bus,
            policy,
        }
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, OrderServiceError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or_else(|| DomainError::NotFound.into())
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderServiceError> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    /// Administrative status transition.
    #[instrument(skip(self), fields(order_id = %order_id, target = target.as_str()), err)]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<Order, OrderServiceError> {
        let mut order = self.get_order(order_id).await?;

        let command = OrderCommand::transition_to(order_id, target, Utc::now())
            .ok_or_else(|| DomainError::validation("pending is not a transition target"))?;

        let events = order.handle(&command)?;
        let expected = ExpectedVersion::Exact(order.version());
        let first_sequence = order.version() + 1;
        for event in &events {
            order.apply(event);
        }

        self.orders.save(order.clone(), expected).await?;
        publish_committed(&self.bus, *order_id.as_uuid(), "order", first_sequence, &events);

        if target == OrderStatus::Cancelled && self.policy.restock_on_cancel {
            self.restock(&order).await;
        }

        Ok(order)
    }

    /// Best-effort: the order is already cancelled, so a failed increment is
    /// logged for replay rather than surfaced.
    async fn restock(&self, order: &Order) {
        for line in order.lines() {
            if let Err(e) = self.catalog.increment(line.product_id, line.quantity).await {
                tracing::error!(
                    order_id = %order.id_typed(),
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    "restock after cancellation failed"
                );
            }
        }
    }
}
