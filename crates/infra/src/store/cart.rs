//! Cart store: one durable cart per user.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use tradepost_cart::Cart;
use tradepost_core::{AggregateRoot, ExpectedVersion, UserId};

use super::StoreError;

/// Durable per-user cart state, keyed by `UserId` (at most one live cart per
/// user).
///
/// Writes carry an [`ExpectedVersion`] so two concurrent mutations of the
/// same user's cart cannot silently overwrite one another: the losing writer
/// gets `Conflict` and must reload.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Load the user's cart, or `None` if the user never added anything.
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>, StoreError>;

    /// Persist the cart if its stored version still matches `expected`
    /// (an absent record counts as version 0).
    async fn save(
        &self,
        user_id: UserId,
        cart: Cart,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
}

/// In-memory cart store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<UserId, Cart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let carts = self
            .carts
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        Ok(carts.get(&user_id).cloned())
    }

    async fn save(
        &self,
        user_id: UserId,
        cart: Cart,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut carts = self
            .carts
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let current = carts.get(&user_id).map(|c| c.version()).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::conflict(format!(
                "cart for user {user_id}: expected {expected:?}, found {current}"
            )));
        }

        carts.insert(user_id, cart);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tradepost_cart::{AddItem, CartCommand};
    use tradepost_core::{Aggregate, CartId, ProductId};

    fn cart_with_one_item(user_id: UserId) -> Cart {
        let cart_id = CartId::new();
        let mut cart = Cart::empty(cart_id);
        let events = cart
            .handle(&CartCommand::AddItem(AddItem {
                cart_id,
                user_id,
                product_id: ProductId::new(),
                quantity: 1,
                available_stock: 10,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            cart.apply(e);
        }
        cart
    }

    #[tokio::test]
    async fn load_of_unknown_user_is_none() {
        let store = InMemoryCartStore::new();
        assert!(store.load(UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCartStore::new();
        let user_id = UserId::new();
        let cart = cart_with_one_item(user_id);

        store
            .save(user_id, cart.clone(), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        let loaded = store.load(user_id).await.unwrap().unwrap();
        assert_eq!(loaded, cart);
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let store = InMemoryCartStore::new();
        let user_id = UserId::new();
        let cart = cart_with_one_item(user_id);

        store
            .save(user_id, cart.clone(), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        // A writer that loaded before the save above must lose.
        let err = store
            .save(user_id, cart, ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn unconditional_save_always_wins() {
        let store = InMemoryCartStore::new();
        let user_id = UserId::new();
        let cart = cart_with_one_item(user_id);

        store
            .save(user_id, cart.clone(), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        store
            .save(user_id, cart, ExpectedVersion::Any)
            .await
            .unwrap();
    }
}
