//! `tradepost-api` — HTTP edge for the cart-to-order pipeline.

pub mod app;
pub mod context;
pub mod middleware;
