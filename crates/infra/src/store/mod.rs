//! Store ports and adapters.
//!
//! Each port has an in-memory adapter (tests/dev) and a Postgres adapter
//! (production). The in-memory adapters are the reference semantics: the
//! Postgres ones must behave identically under concurrency.

use thiserror::Error;

pub mod catalog;
pub mod cart;
pub mod order;
pub mod postgres;

pub use catalog::{CatalogStore, InMemoryCatalog};
pub use cart::{CartStore, InMemoryCartStore};
pub use order::{InMemoryOrderStore, OrderStore};
pub use postgres::{PostgresCartStore, PostgresCatalog, PostgresOrderStore};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed, or a conditional write lost a
    /// race (e.g. a stock decrement found insufficient quantity).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The addressed record does not exist.
    #[error("not found")]
    NotFound,

    /// Payload (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backing store failed (connection, pool, lock poisoning, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
