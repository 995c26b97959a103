//! Cart operations: validate against live stock, persist with per-user
//! optimistic serialization.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use tradepost_cart::{AddItem, Cart, CartCommand, RemoveItem, SetItemQuantity};
use tradepost_core::{Aggregate, AggregateRoot, CartId, DomainError, ExpectedVersion, ProductId, UserId};

use crate::publish::{SharedEventBus, publish_committed};
use crate::store::{CartStore, CatalogStore, StoreError};

/// How many times a conflicted cart save is retried (reload, re-decide,
/// re-save) before the conflict is surfaced.
const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum CartServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The cart service.
///
/// Side effects are confined to the cart store; the catalog is read-only
/// from here. Stock bounds are read once per call and carried into the
/// aggregate's command.
#[derive(Clone)]
pub struct CartService {
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    bus: SharedEventBus,
}

impl CartService {
    pub fn new(catalog: Arc<dyn CatalogStore>, carts: Arc<dyn CartStore>, bus: SharedEventBus) -> Self {
        Self { catalog, carts, bus }
    }

    /// The user's cart, or an empty cart value if none exists yet.
    /// No error on absence.
    pub async fn get_cart(&self, user_id: UserId) -> Result<Cart, CartServiceError> {
        Ok(self
            .carts
            .load(user_id)
            .await?
            .unwrap_or_else(|| Cart::empty(CartId::new())))
    }

    /// Sum of all line quantities; 0 for an absent/empty cart.
    pub async fn item_count(&self, user_id: UserId) -> Result<i64, CartServiceError> {
        Ok(self
            .carts
            .load(user_id)
            .await?
            .map(|c| c.item_count())
            .unwrap_or(0))
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id), err)]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, CartServiceError> {
        if quantity < 1 {
            return Err(DomainError::validation("quantity must be at least 1").into());
        }

        let product = self.read_product(product_id).await?;
        let available_stock = product.purchasable_stock();

        self.mutate(user_id, |cart| {
            CartCommand::AddItem(AddItem {
                cart_id: cart.id_typed(),
                user_id,
                product_id,
                quantity,
                available_stock,
                occurred_at: Utc::now(),
            })
        })
        .await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id), err)]
    pub async fn update_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, CartServiceError> {
        // The removal path (< 1) must work even for delisted products, so
        // the catalog is only consulted when a stock bound is needed.
        let available_stock = if quantity >= 1 {
            self.read_product(product_id).await?.purchasable_stock()
        } else {
            0
        };

        self.mutate(user_id, |cart| {
            CartCommand::SetItemQuantity(SetItemQuantity {
                cart_id: cart.id_typed(),
                user_id,
                product_id,
                quantity,
                available_stock,
                occurred_at: Utc::now(),
            })
        })
        .await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id), err)]
    pub async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, CartServiceError> {
        self.mutate(user_id, |cart| {
            CartCommand::RemoveItem(RemoveItem {
                cart_id: cart.id_typed(),
                user_id,
                product_id,
                occurred_at: Utc::now(),
            })
        })
        .await
    }

    async fn read_product(
        &self,
        product_id: ProductId,
    ) -> Result<tradepost_catalog::Product, CartServiceError> {
        self.catalog.read(product_id).await.map_err(|e| match e {
            StoreError::NotFound => CartServiceError::Domain(DomainError::NotFound),
            other => CartServiceError::Store(other),
        })
    }

    /// Load-decide-apply-save with bounded optimistic retry.
    ///
    /// The save carries the loaded version; a concurrent writer makes the
    /// save conflict, in which case the whole decision is re-run against the
    /// fresh cart rather than overwriting blind.
    async fn mutate<F>(&self, user_id: UserId, make_command: F) -> Result<Cart, CartServiceError>
    where
        F: Fn(&Cart) -> CartCommand,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut cart = self
                .carts
                .load(user_id)
                .await?
                .unwrap_or_else(|| Cart::empty(CartId::new()));

            let expected = ExpectedVersion::Exact(cart.version());
            let command = make_command(&cart);
            let events = cart.handle(&command)?;

            if events.is_empty() {
                // Idempotent no-op (e.g. removing an absent line).
                return Ok(cart);
            }

            let first_sequence = cart.version() + 1;
            for event in &events {
                cart.apply(event);
            }

            match self.carts.save(user_id, cart.clone(), expected).await {
                Ok(()) => {
                    publish_committed(
                        &self.bus,
                        *cart.id_typed().as_uuid(),
                        "cart",
                        first_sequence,
                        &events,
                    );
                    return Ok(cart);
                }
                Err(e) if e.is_conflict() && attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::debug!(%user_id, attempt, "cart save conflicted, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
