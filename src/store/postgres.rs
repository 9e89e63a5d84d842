use sqlx::postgres::PgPool;
use sqlx::Row;

use super::{OrderStore, StoreError};
use crate::models::Order;

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// Schema (provisioned externally, see schema.sql): one row per order, keyed
// by `order_uid` as the primary key. The aggregate body lives in a JSONB
// column; Delivery/Payment/Items have no identity outside their order, so
// they travel inside the row and are destroyed with it.
//
// The primary key is the uniqueness invariant this subsystem relies on:
// a concurrent second insert for the same key fails with SQLSTATE 23505,
// which `create` surfaces as `StoreError::Duplicate`.
// ============================================================================

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl OrderStore for PgOrderStore {
    async fn find_by_uid(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT data FROM orders WHERE order_uid = $1")
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let data = serde_json::to_value(order)?;

        let result = sqlx::query(
            "INSERT INTO orders (order_uid, track_number, date_created, data) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(order.date_created)
        .bind(data)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::Duplicate(order.order_uid.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_all(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("SELECT data FROM orders ORDER BY date_created")
            .fetch_all(&self.pool)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let data: serde_json::Value = row.try_get("data")?;
            orders.push(serde_json::from_value(data)?);
        }
        Ok(orders)
    }
}
