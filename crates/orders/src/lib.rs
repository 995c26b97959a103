//! `tradepost-orders` — the order aggregate and its status machine.

pub mod order;

pub use order::{
    CancelOrder, MarkDelivered, MarkShipped, Order, OrderCancelled, OrderCommand, OrderDelivered,
    OrderEvent, OrderLine, OrderPlaced, OrderProcessingStarted, OrderShipped, OrderStatus,
    PlaceOrder, StartProcessing,
};
