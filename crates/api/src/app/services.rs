//! Infrastructure wiring: stores, event bus, and the three services.

use std::sync::Arc;

use sqlx::PgPool;

use tradepost_events::{EventBus, InMemoryEventBus};
use tradepost_infra::{
    CartService, CartStore, CatalogStore, CheckoutService, InMemoryCartStore, InMemoryCatalog,
    InMemoryOrderStore, OrderPolicy, OrderService, OrderStore, PostgresCartStore, PostgresCatalog,
    PostgresOrderStore, SharedEventBus,
};

pub struct AppServices {
    pub cart_service: CartService,
    pub checkout_service: CheckoutService,
    pub order_service: OrderService,
    /// Kept for seeding/admin tooling; request handlers never touch it.
    pub catalog: Arc<dyn CatalogStore>,
    pub bus: SharedEventBus,
}

/// Wire services over any store set.
pub fn build_services_with(
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    policy: OrderPolicy,
) -> AppServices {
    let bus: SharedEventBus = Arc::new(InMemoryEventBus::new());

    // Committed-event log: drains the bus so domain events show up in the
    // structured logs without any consumer having to exist.
    let subscription = bus.subscribe();
    std::thread::spawn(move || {
        while let Ok(envelope) = subscription.recv() {
            tracing::debug!(
                aggregate_type = envelope.aggregate_type(),
                aggregate_id = %envelope.aggregate_id(),
                sequence_number = envelope.sequence_number(),
                "domain event committed"
            );
        }
    });

    let cart_service = CartService::new(catalog.clone(), carts.clone(), bus.clone());
    let checkout_service =
        CheckoutService::new(catalog.clone(), carts.clone(), orders.clone(), bus.clone());
    let order_service = OrderService::new(orders, catalog.clone(), bus.clone(), policy);

    AppServices {
        cart_service,
        checkout_service,
        order_service,
        catalog,
        bus,
    }
}

pub async fn build_services(policy: OrderPolicy) -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        match build_persistent_services(policy).await {
            Ok(services) => return services,
            Err(e) => {
                tracing::warn!(error = %e, "persistent stores unavailable, falling back to in-memory");
            }
        }
    }

    build_in_memory_services(policy)
}

fn build_in_memory_services(policy: OrderPolicy) -> AppServices {
    build_services_with(
        Arc::new(InMemoryCatalog::new()),
        Arc::new(InMemoryCartStore::new()),
        Arc::new(InMemoryOrderStore::new()),
        policy,
    )
}

async fn build_persistent_services(policy: OrderPolicy) -> Result<AppServices, anyhow::Error> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let pool = PgPool::connect(&url).await?;

    Ok(build_services_with(
        Arc::new(PostgresCatalog::new(pool.clone())),
        Arc::new(PostgresCartStore::new(pool.clone())),
        Arc::new(PostgresOrderStore::new(pool)),
        policy,
    ))
}
