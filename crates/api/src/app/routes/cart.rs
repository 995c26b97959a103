use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};

use tradepost_core::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().nest("/cart", cart_router())
}

fn cart_router() -> Router {
    Router::new()
        .route("/", get(get_cart))
        .route("/count", get(get_item_count))
        .route("/items", post(add_item))
        .route("/items/:product_id", patch(update_item).delete(remove_item))
}

fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
    })
}

pub async fn get_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.cart_service.get_cart(user.user_id()).await {
        Ok(cart) => (StatusCode::OK, Json(dto::cart_to_json(&cart))).into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}

pub async fn get_item_count(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.cart_service.item_count(user.user_id()).await {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({ "item_count": count })),
        )
            .into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::AddItemRequest>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&body.product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .cart_service
        .add_item(user.user_id(), product_id, body.quantity)
        .await
    {
        Ok(cart) => (StatusCode::OK, Json(dto::cart_to_json(&cart))).into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(product_id): Path<String>,
    Json(body): Json<dto::UpdateItemRequest>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .cart_service
        .update_item(user.user_id(), product_id, body.quantity)
        .await
    {
        Ok(cart) => (StatusCode::OK, Json(dto::cart_to_json(&cart))).into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .cart_service
        .remove_item(user.user_id(), product_id)
        .await
    {
        Ok(cart) => (StatusCode::OK, Json(dto::cart_to_json(&cart))).into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}
