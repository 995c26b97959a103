//! Postgres-backed store adapters.
//!
//! Expected schema (managed by external migrations):
//!
//! ```sql
//! CREATE TABLE products (
//!     id          UUID PRIMARY KEY,
//!     title       TEXT NOT NULL,
//!     unit_price  BIGINT NOT NULL CHECK (unit_price >= 0),
//!     quantity    BIGINT NOT NULL CHECK (quantity >= 0),
//!     status      TEXT NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE carts (
//!     user_id     UUID PRIMARY KEY,
//!     payload     JSONB NOT NULL,
//!     version     BIGINT NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE orders (
//!     id          UUID PRIMARY KEY,
//!     user_id     UUID NOT NULL,
//!     payload     JSONB NOT NULL,
//!     status      TEXT NOT NULL,
//!     version     BIGINT NOT NULL,
//!     placed_at   TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX orders_user_idx ON orders (user_id, placed_at DESC);
//! ```
//!
//! ## Concurrency
//!
//! The stock guard is one conditional `UPDATE ... WHERE quantity >= $n`; the
//! database serializes competing decrements on the row, so losers see zero
//! affected rows and map to `Conflict`. Cart/order saves take the row lock
//! (`SELECT ... FOR UPDATE`) inside a transaction before checking the
//! expected version, mirroring the in-memory adapters.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | StoreError |
//! |------------|---------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation)  | `23514` | `Conflict` |
//! | RowNotFound | — | `NotFound` |
//! | other | — | `Backend` |

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tradepost_cart::Cart;
use tradepost_catalog::{Product, ProductStatus};
use tradepost_core::{AggregateRoot, ExpectedVersion, OrderId, ProductId, UserId};
use tradepost_orders::Order;

use super::{CartStore, CatalogStore, OrderStore, StoreError};

fn map_sqlx_error(op: &'static str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") | Some("23514") => StoreError::conflict(format!("{op}: {db}")),
            _ => StoreError::backend(format!("{op}: {db}")),
        },
        _ => StoreError::backend(format!("{op}: {e}")),
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    op: &'static str,
    payload: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(payload)
        .map_err(|e| StoreError::Serialization(format!("{op}: {e}")))
}

fn encode_payload<T: serde::Serialize>(
    op: &'static str,
    value: &T,
) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(format!("{op}: {e}")))
}

/// Postgres-backed catalog (products + stock guard).
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalog {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn read(&self, product_id: ProductId) -> Result<Product, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, unit_price, quantity, status, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("products.read", e))?;

        let unit_price: i64 = row
            .try_get("unit_price")
            .map_err(|e| map_sqlx_error("products.read", e))?;
        let unit_price = u64::try_from(unit_price)
            .map_err(|_| StoreError::Serialization("products.read: negative unit_price".into()))?;

        let status: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("products.read", e))?;
        let status = ProductStatus::parse(&status)
            .map_err(|e| StoreError::Serialization(format!("products.read: {e}")))?;

        Ok(Product {
            id: ProductId::from_uuid(
                row.try_get("id").map_err(|e| map_sqlx_error("products.read", e))?,
            ),
            title: row
                .try_get("title")
                .map_err(|e| map_sqlx_error("products.read", e))?,
            unit_price,
            quantity: row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("products.read", e))?,
            status,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| map_sqlx_error("products.read", e))?,
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn decrement_if_available(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        // Single conditional UPDATE: the check and the subtraction are one
        // statement, so concurrent callers serialize on the row.
        let result = sqlx::query(
            r#"
            UPDATE products
            SET quantity = quantity - $2,
                status = CASE
                    WHEN quantity - $2 <= 0 AND status = 'available' THEN 'out_of_stock'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1 AND quantity >= $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("products.decrement", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Distinguish "lost the race" from "no such product".
        let exists = sqlx::query("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("products.decrement", e))?
            .is_some();

        if exists {
            Err(StoreError::conflict(format!(
                "product {product_id} has insufficient stock for {quantity}"
            )))
        } else {
            Err(StoreError::NotFound)
        }
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET quantity = quantity + $2,
                status = CASE
                    WHEN quantity + $2 > 0 AND status = 'out_of_stock' THEN 'available'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("products.increment", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn upsert(&self, product: Product) -> Result<(), StoreError> {
        let unit_price = i64::try_from(product.unit_price)
            .map_err(|_| StoreError::Serialization("products.upsert: unit_price too large".into()))?;

        sqlx::query(
            r#"
            INSERT INTO products (id, title, unit_price, quantity, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                unit_price = EXCLUDED.unit_price,
                quantity = EXCLUDED.quantity,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.title)
        .bind(unit_price)
        .bind(product.quantity)
        .bind(product.status.as_str())
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("products.upsert", e))?;

        Ok(())
    }
}

/// Postgres-backed cart store (payload as JSONB, optimistic version column).
#[derive(Debug, Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query("SELECT payload FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("carts.load", e))?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row
                    .try_get("payload")
                    .map_err(|e| map_sqlx_error("carts.load", e))?;
                Ok(Some(decode_payload("carts.load", payload)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, cart), fields(user_id = %user_id), err)]
    async fn save(
        &self,
        user_id: UserId,
        cart: Cart,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let payload = encode_payload("carts.save", &cart)?;
        let version = i64::try_from(cart.version())
            .map_err(|_| StoreError::Serialization("carts.save: version too large".into()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("carts.save", e))?;

        let current: i64 = sqlx::query("SELECT version FROM carts WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("carts.save", e))?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("carts.save", e))?
            .unwrap_or(0);

        if !expected.matches(current as u64) {
            return Err(StoreError::conflict(format!(
                "cart for user {user_id}: expected {expected:?}, found {current}"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, payload, version, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(&payload)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("carts.save", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("carts.save", e))?;
        Ok(())
    }
}

/// Postgres-backed order store (payload as JSONB; status mirrored to a
/// column for queries).
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let payload = encode_payload("orders.insert", &order)?;
        let version = i64::try_from(order.version())
            .map_err(|_| StoreError::Serialization("orders.insert: version too large".into()))?;
        let user_id = order.user_id().ok_or_else(|| {
            StoreError::Serialization("orders.insert: order has no user".into())
        })?;
        let placed_at = order.placed_at().ok_or_else(|| {
            StoreError::Serialization("orders.insert: order has no placement time".into())
        })?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, payload, status, version, placed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id_typed().as_uuid())
        .bind(user_id.as_uuid())
        .bind(&payload)
        .bind(order.status().as_str())
        .bind(version)
        .bind(placed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders.insert", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT payload FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("orders.load", e))?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row
                    .try_get("payload")
                    .map_err(|e| map_sqlx_error("orders.load", e))?;
                Ok(Some(decode_payload("orders.load", payload)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn save(&self, order: Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let payload = encode_payload("orders.save", &order)?;
        let version = i64::try_from(order.version())
            .map_err(|_| StoreError::Serialization("orders.save: version too large".into()))?;
        let order_id = order.id_typed();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("orders.save", e))?;

        let current: i64 = sqlx::query("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("orders.save", e))?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("orders.save", e))?
            .ok_or(StoreError::NotFound)?;

        if !expected.matches(current as u64) {
            return Err(StoreError::conflict(format!(
                "order {order_id}: expected {expected:?}, found {current}"
            )));
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET payload = $2, status = $3, version = $4
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(&payload)
        .bind(order.status().as_str())
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("orders.save", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("orders.save", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM orders WHERE user_id = $1 ORDER BY placed_at DESC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders.list", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row
                .try_get("payload")
                .map_err(|e| map_sqlx_error("orders.list", e))?;
            orders.push(decode_payload("orders.list", payload)?);
        }
        Ok(orders)
    }
}
