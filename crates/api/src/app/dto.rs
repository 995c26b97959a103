use serde::Deserialize;
use serde_json::json;

use tradepost_cart::Cart;
use tradepost_orders::Order;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    /// Defaults to 1, as the storefront's "add to cart" button sends.
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

// -------------------------
// Response mapping
// -------------------------

pub fn cart_to_json(cart: &Cart) -> serde_json::Value {
    json!({
        "id": cart.id_typed().to_string(),
        "user_id": cart.user_id().map(|u| u.to_string()),
        "items": cart.lines().iter().map(|line| json!({
            "product_id": line.product_id.to_string(),
            "quantity": line.quantity,
        })).collect::<Vec<_>>(),
        "item_count": cart.item_count(),
        "created_at": cart.created_at(),
        "updated_at": cart.updated_at(),
    })
}

pub fn order_to_json(order: &Order) -> serde_json::Value {
    json!({
        "id": order.id_typed().to_string(),
        "user_id": order.user_id().map(|u| u.to_string()),
        "status": order.status().as_str(),
        "total_amount": order.total_amount(),
        "placed_at": order.placed_at(),
        "items": order.lines().iter().map(|line| json!({
            "product_id": line.product_id.to_string(),
            "product_name": line.product_name,
            "quantity": line.quantity,
            "unit_price": line.unit_price,
        })).collect::<Vec<_>>(),
    })
}
