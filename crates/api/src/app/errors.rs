use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tradepost_core::DomainError;
use tradepost_infra::{CartServiceError, CheckoutError, OrderServiceError, StoreError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::StockExceeded { .. } => {
            json_error(StatusCode::CONFLICT, "stock_exceeded", err.to_string())
        }
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        StoreError::Serialization(msg) | StoreError::Backend(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn cart_error_to_response(err: CartServiceError) -> axum::response::Response {
    match err {
        CartServiceError::Domain(e) => domain_error_to_response(e),
        CartServiceError::Store(e) => store_error_to_response(e),
    }
}

pub fn order_error_to_response(err: OrderServiceError) -> axum::response::Response {
    match err {
        OrderServiceError::Domain(e) => domain_error_to_response(e),
        OrderServiceError::Store(e) => store_error_to_response(e),
    }
}

pub fn checkout_error_to_response(err: CheckoutError) -> axum::response::Response {
    match err {
        CheckoutError::EmptyCart => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "empty_cart", "cart is empty")
        }
        CheckoutError::InsufficientStock(products) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": "one or more cart lines exceed current stock",
                "products": products,
            })),
        )
            .into_response(),
        CheckoutError::Conflict(products) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "stock_conflict",
                "message": "stock was consumed by a concurrent checkout; reload the cart",
                "products": products,
            })),
        )
            .into_response(),
        CheckoutError::RollbackFailed { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "stock_rollback_failed",
            err.to_string(),
        ),
        CheckoutError::Domain(e) => domain_error_to_response(e),
        CheckoutError::Store(e) => store_error_to_response(e),
    }
}
