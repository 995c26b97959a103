use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult, ProductId};

/// Listing status of a catalog product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    Inactive,
    OutOfStock,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::Inactive => "inactive",
            ProductStatus::OutOfStock => "out_of_stock",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "available" => Ok(ProductStatus::Available),
            "inactive" => Ok(ProductStatus::Inactive),
            "out_of_stock" => Ok(ProductStatus::OutOfStock),
            other => Err(DomainError::validation(format!(
                "unknown product status '{other}'"
            ))),
        }
    }
}

/// A catalog product as the core reads it.
///
/// The catalog owns these records; from the pipeline's perspective they are
/// read-mostly. The only writes the core performs are the stock guard's
/// atomic decrement/increment, which also maintain the status coupling:
/// `OutOfStock` implies `quantity == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,

    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,

    /// Sellable units on hand. Never negative.
    pub quantity: i64,

    pub status: ProductStatus,

    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: ProductId,
        title: impl Into<String>,
        unit_price: u64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }

        let status = if quantity == 0 {
            ProductStatus::OutOfStock
        } else {
            ProductStatus::Available
        };

        Ok(Self {
            id,
            title,
            unit_price,
            quantity,
            status,
            updated_at: now,
        })
    }

    /// Units a buyer could still order right now.
    pub fn purchasable_stock(&self) -> i64 {
        self.quantity
    }

    /// Status/quantity coupling: `OutOfStock` iff `quantity == 0` cannot be
    /// asserted in full (inactive products may also sit at zero), but the
    /// one-directional invariant must always hold.
    pub fn invariants_hold(&self) -> bool {
        self.quantity >= 0 && (self.status != ProductStatus::OutOfStock || self.quantity == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product_id() -> ProductId {
        ProductId::new()
    }

    #[test]
    fn new_product_with_stock_is_available() {
        let p = Product::new(test_product_id(), "Walnut desk", 12_900, 4, Utc::now()).unwrap();
        assert_eq!(p.status, ProductStatus::Available);
        assert_eq!(p.purchasable_stock(), 4);
        assert!(p.invariants_hold());
    }

    #[test]
    fn new_product_without_stock_is_out_of_stock() {
        let p = Product::new(test_product_id(), "Brass lamp", 4_500, 0, Utc::now()).unwrap();
        assert_eq!(p.status, ProductStatus::OutOfStock);
        assert!(p.invariants_hold());
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let err = Product::new(test_product_id(), "Ghost stock", 100, -1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = Product::new(test_product_id(), "   ", 100, 1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ProductStatus::Available,
            ProductStatus::Inactive,
            ProductStatus::OutOfStock,
        ] {
            assert_eq!(ProductStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ProductStatus::parse("discontinued").is_err());
    }
}
