//! `tradepost-infra` — store ports/adapters and the services that
//! orchestrate the cart-to-order pipeline.

pub mod cart_service;
pub mod checkout_service;
pub mod order_service;
pub mod publish;
pub mod store;


pub use cart_service::{CartService, CartServiceError};
pub use checkout_service::{CheckoutError, CheckoutService};
pub use order_service::{OrderPolicy, OrderService, OrderServiceError};
pub use publish::{CommittedEvent, SharedEventBus};
pub use store::{
    CartStore, CatalogStore, InMemoryCartStore, InMemoryCatalog, InMemoryOrderStore, OrderStore,
    PostgresCartStore, PostgresCatalog, PostgresOrderStore, StoreError,
};
