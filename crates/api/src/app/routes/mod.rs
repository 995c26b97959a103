use axum::Router;

pub mod cart;
pub mod checkout;
pub mod orders;
pub mod system;

/// All authenticated routes.
pub fn router() -> Router {
    Router::new()
        .merge(cart::router())
        .merge(checkout::router())
        .merge(orders::router())
}
