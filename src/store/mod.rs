// Store gateway: the trait is the contract the core programs against;
// `postgres` is the production implementation.
mod postgres;

pub use postgres::PgOrderStore;

use crate::models::Order;

// ============================================================================
// Order Store Gateway
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An order with this `order_uid` already exists. This is the store's
    /// uniqueness constraint firing; callers treat it as a dedupe outcome,
    /// not a failure.
    #[error("order already exists: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored order payload is not decodable: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Synchronous-contract access to durable order records.
///
/// `create` must fail with [`StoreError::Duplicate`] when the key already
/// exists; that distinction is the final backstop for the ingestion race
/// where two handlers pass the dedupe checks concurrently.
#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_uid(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    async fn create(&self, order: &Order) -> Result<(), StoreError>;

    /// Full scan, used only for cache warm-up at startup.
    async fn find_all(&self) -> Result<Vec<Order>, StoreError>;
}
