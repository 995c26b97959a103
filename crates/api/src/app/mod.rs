//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, event bus, services)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use chrono::Utc;
use tower::ServiceBuilder;

use tradepost_auth::{Hs256TokenResolver, TokenResolver};
use tradepost_catalog::Product;
use tradepost_core::ProductId;
use tradepost_infra::{CatalogStore, OrderPolicy};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false)
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(jwt_secret: String) -> Router {
    let resolver: Arc<dyn TokenResolver> = Arc::new(Hs256TokenResolver::new(jwt_secret.as_bytes()));

    let policy = OrderPolicy {
        restock_on_cancel: env_flag("RESTOCK_ON_CANCEL"),
    };
    let services = Arc::new(services::build_services(policy).await);

    if env_flag("DEMO_SEED") {
        seed_demo_catalog(&services).await;
    }

    build_app_with(resolver, services)
}

/// Build the router over pre-wired services (tests, embedding).
pub fn build_app_with(
    resolver: Arc<dyn TokenResolver>,
    services: Arc<services::AppServices>,
) -> Router {
    let auth_state = middleware::AuthState { resolver };

    // Protected routes: require a resolved caller identity.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

async fn seed_demo_catalog(services: &services::AppServices) {
    let demo = [
        ("Walnut standing desk", 54_900_u64, 12_i64),
        ("Brass reading lamp", 8_900, 30),
        ("Linen sofa throw", 3_400, 0),
    ];

    for (title, unit_price, quantity) in demo {
        match Product::new(ProductId::new(), title, unit_price, quantity, Utc::now()) {
            Ok(product) => {
                let id = product.id;
                match services.catalog.upsert(product).await {
                    Ok(()) => tracing::info!(product_id = %id, title, quantity, "seeded demo product"),
                    Err(e) => tracing::warn!(title, error = %e, "demo seed failed"),
                }
            }
            Err(e) => tracing::warn!(title, error = %e, "demo product invalid"),
        }
    }
}
