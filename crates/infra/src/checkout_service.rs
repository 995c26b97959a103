//! Checkout: convert a cart into an order while consuming stock, as a single
//! all-or-nothing workflow.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use tradepost_cart::{CartCommand, CartLine, ClearCart};
use tradepost_catalog::Product;
use tradepost_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, OrderId, ProductId, UserId,
};
use tradepost_orders::{Order, OrderCommand, OrderLine, PlaceOrder};

use crate::publish::{SharedEventBus, publish_committed};
use crate::store::{CartStore, CatalogStore, OrderStore, StoreError};

/// Bounded retries for reversing a decrement. An un-rolled-back decrement
/// corrupts the stock invariant, so these failures are retried transparently
/// and then escalated, never swallowed.
const ROLLBACK_ATTEMPTS: u32 = 3;

/// Bounded retries for clearing the cart once the order is committed.
const CLEAR_ATTEMPTS: u32 = 3;

fn format_products(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart has no lines; nothing happened.
    #[error("cart is empty")]
    EmptyCart,

    /// Validation found lines exceeding current stock. Names every
    /// offending product. No mutation occurred.
    #[error("insufficient stock for: {}", format_products(.0))]
    InsufficientStock(Vec<ProductId>),

    /// Stock was consumed by a competing checkout between validation and
    /// commit. Any partial decrements were reversed; the caller should
    /// reload the cart before retrying.
    #[error("stock consumed by a concurrent checkout: {}", format_products(.0))]
    Conflict(Vec<ProductId>),

    /// Rollback compensation exhausted its retries. The stock invariant is
    /// violated until the increment is replayed.
    #[error("stock rollback failed for product {product_id} (quantity {quantity}): {source}")]
    RollbackFailed {
        product_id: ProductId,
        quantity: i64,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The checkout service.
///
/// The commit pass is a bounded sequence of independent atomic decrements in
/// ascending product order plus compensation on partial failure; no
/// multi-row lock is ever held. There is no retry on [`CheckoutError::Conflict`]:
/// the caller re-validates by reloading the cart.
#[derive(Clone)]
pub struct CheckoutService {
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    bus: SharedEventBus,
}

impl CheckoutService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        carts: Arc<dyn CartStore>,
        orders: Arc<dyn OrderStore>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            catalog,
            carts,
            orders,
            bus,
        }
    }

    /// Run checkout for the user's cart.
    ///
    /// The work runs on its own task: if the caller's future is dropped
    /// (client disconnect) after decrements started, the task still runs to
    /// completion or full rollback; a partial state is not an acceptable
    /// terminal outcome.
    pub async fn checkout(&self, user_id: UserId) -> Result<Order, CheckoutError> {
        let service = self.clone();
        match tokio::spawn(async move { service.run(user_id).await }).await {
            Ok(result) => result,
            Err(e) => Err(StoreError::backend(format!("checkout task aborted: {e}")).into()),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn run(&self, user_id: UserId) -> Result<Order, CheckoutError> {
        // Step 1: load the cart; an absent or empty cart ends here.
        let Some(mut cart) = self.carts.load(user_id).await? else {
            return Err(CheckoutError::EmptyCart);
        };
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        // Step 2: validation pass. Read every line's product; collect every
        // offender. No mutation has occurred yet. A product that vanished
        // from the catalog has no purchasable stock.
        let mut lines: Vec<(CartLine, Product)> = Vec::with_capacity(cart.lines().len());
        let mut short: Vec<ProductId> = Vec::new();
        for line in cart.lines() {
            match self.catalog.read(line.product_id).await {
                Ok(product) => {
                    if line.quantity > product.purchasable_stock() {
                        short.push(line.product_id);
                    }
                    lines.push((*line, product));
                }
                Err(StoreError::NotFound) => short.push(line.product_id),
                Err(e) => return Err(e.into()),
            }
        }
        if !short.is_empty() {
            return Err(CheckoutError::InsufficientStock(short));
        }

        // Step 3: commit pass. Ascending product id keeps the decrement
        // order deterministic across concurrent checkouts that share
        // products.
        let mut plan = lines.clone();
        plan.sort_by_key(|(line, _)| line.product_id);

        let mut applied: Vec<(ProductId, i64)> = Vec::with_capacity(plan.len());
        for (line, _) in &plan {
            match self
                .catalog
                .decrement_if_available(line.product_id, line.quantity)
                .await
            {
                Ok(()) => applied.push((line.product_id, line.quantity)),
                Err(StoreError::Conflict(_)) | Err(StoreError::NotFound) => {
                    self.rollback(&applied).await?;
                    return Err(CheckoutError::Conflict(vec![line.product_id]));
                }
                Err(e) => {
                    self.rollback(&applied).await?;
                    return Err(e.into());
                }
            }
        }

        // Step 4: place the order from the validation-pass snapshots. The
        // total is computed inside the aggregate.
        let order_id = OrderId::new();
        let order_lines: Vec<OrderLine> = lines
            .iter()
            .map(|(line, product)| OrderLine {
                product_id: line.product_id,
                product_name: product.title.clone(),
                quantity: line.quantity,
                unit_price: product.unit_price,
            })
            .collect();

        let mut order = Order::empty(order_id);
        let place = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            user_id,
            lines: order_lines,
            occurred_at: Utc::now(),
        });
        let order_events = match order.handle(&place) {
            Ok(events) => events,
            Err(e) => {
                self.rollback(&applied).await?;
                return Err(e.into());
            }
        };
        for event in &order_events {
            order.apply(event);
        }

        if let Err(e) = self.orders.insert(order.clone()).await {
            // All-or-nothing: decrements must not survive a failed order write.
            self.rollback(&applied).await?;
            return Err(e.into());
        }

        publish_committed(&self.bus, *order_id.as_uuid(), "order", 1, &order_events);

        tracing::info!(
            order_id = %order_id,
            total_amount = order.total_amount(),
            line_count = order.lines().len(),
            "checkout committed"
        );

        // Step 5: clear the cart, keeping the record. Checkout is the single
        // writer that empties a cart, so the save is unconditional. The order
        // is already the source of truth here: a stubbornly failing clear is
        // escalated in the logs, not converted into a rollback.
        self.clear_cart(user_id, &mut cart, order_id).await;

        Ok(order)
    }

    async fn clear_cart(
        &self,
        user_id: UserId,
        cart: &mut tradepost_cart::Cart,
        order_id: OrderId,
    ) {
        let clear = CartCommand::ClearCart(ClearCart {
            cart_id: cart.id_typed(),
            user_id,
            occurred_at: Utc::now(),
        });

        let events = match cart.handle(&clear) {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(%user_id, %order_id, error = %e, "cart clear rejected after checkout");
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        let first_sequence = cart.version() + 1;
        for event in &events {
            cart.apply(event);
        }

        for attempt in 1..=CLEAR_ATTEMPTS {
            match self
                .carts
                .save(user_id, cart.clone(), ExpectedVersion::Any)
                .await
            {
                Ok(()) => {
                    publish_committed(
                        &self.bus,
                        *cart.id_typed().as_uuid(),
                        "cart",
                        first_sequence,
                        &events,
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(%user_id, attempt, error = %e, "cart clear attempt failed");
                }
            }
        }

        tracing::error!(%user_id, %order_id, "cart not cleared after checkout; lines remain until the next mutation");
    }

    /// Reverse every decrement applied in this attempt, newest first.
    ///
    /// `increment` is a plain atomic add and cannot fail due to contention;
    /// anything that does fail here is an infrastructure fault.
    async fn rollback(&self, applied: &[(ProductId, i64)]) -> Result<(), CheckoutError> {
        for &(product_id, quantity) in applied.iter().rev() {
            let mut last_err: Option<StoreError> = None;
            for attempt in 1..=ROLLBACK_ATTEMPTS {
                match self.catalog.increment(product_id, quantity).await {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            %product_id,
                            quantity,
                            attempt,
                            error = %e,
                            "stock rollback attempt failed"
                        );
                        last_err = Some(e);
                    }
                }
            }
            if let Some(source) = last_err {
                tracing::error!(
                    %product_id,
                    quantity,
                    error = %source,
                    "stock rollback exhausted retries; stock invariant violated"
                );
                return Err(CheckoutError::RollbackFailed {
                    product_id,
                    quantity,
                    source,
                });
            }
        }
        Ok(())
    }
}
