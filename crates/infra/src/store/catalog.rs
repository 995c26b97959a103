//! Catalog port: product reads plus the stock guard.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use tradepost_catalog::{Product, ProductStatus};
use tradepost_core::ProductId;

use super::StoreError;

/// Catalog collaborator as the pipeline consumes it.
///
/// `decrement_if_available` is the **stock guard**: check-and-subtract as one
/// indivisible operation, so two callers competing for the last units cannot
/// both observe sufficient stock and both succeed. `increment` is its inverse,
/// used for rollback compensation; it is a plain atomic add and cannot fail
/// due to contention.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Read a product record. `NotFound` if absent.
    async fn read(&self, product_id: ProductId) -> Result<Product, StoreError>;

    /// Atomically subtract `quantity` from stock if at least that much is on
    /// hand. `Conflict` if stock is insufficient; `NotFound` if the product
    /// does not exist. Draining stock to zero flips the status to
    /// `out_of_stock`.
    async fn decrement_if_available(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError>;

    /// Atomically add `quantity` back to stock. Raising stock above zero
    /// flips `out_of_stock` back to `available`.
    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError>;

    /// Insert or replace a product record (seeding, admin tooling, tests).
    async fn upsert(&self, product: Product) -> Result<(), StoreError>;
}

/// In-memory catalog.
///
/// Intended for tests/dev. The stock guard's atomicity comes from doing the
/// check and the subtraction inside one write-lock section.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn read(&self, product_id: ProductId) -> Result<Product, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        products.get(&product_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn decrement_if_available(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let product = products.get_mut(&product_id).ok_or(StoreError::NotFound)?;

        if product.quantity < quantity {
            return Err(StoreError::conflict(format!(
                "product {product_id} has {} in stock, {quantity} requested",
                product.quantity
            )));
        }

        product.quantity -= quantity;
        if product.quantity == 0 && product.status == ProductStatus::Available {
            product.status = ProductStatus::OutOfStock;
        }
        product.updated_at = Utc::now();

        Ok(())
    }

    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let product = products.get_mut(&product_id).ok_or(StoreError::NotFound)?;

        product.quantity += quantity;
        if product.quantity > 0 && product.status == ProductStatus::OutOfStock {
            product.status = ProductStatus::Available;
        }
        product.updated_at = Utc::now();

        Ok(())
    }

    async fn upsert(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        products.insert(product.id, product);
        Ok(())
    }
}
