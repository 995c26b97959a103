//! `tradepost-observability` — process-wide logging/tracing setup.

mod tracing;

pub use crate::tracing::init;
