use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::Order;
use crate::store::{OrderStore, StoreError};

// ============================================================================
// Order Cache - process-local read-through accelerator
// ============================================================================
//
// Concurrency contract: many readers, one writer at a time per mutation.
// A reader racing an `add` on the same key observes either the old or the
// new order, never a partial one (the map entry is replaced atomically under
// the write lock).
// ============================================================================

pub struct OrderCache {
    orders: RwLock<HashMap<String, Order>>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites the entry for the order's key.
    /// Idempotent: last write wins on the same `order_uid`.
    pub fn add(&self, order: Order) {
        let uid = order.order_uid.clone();
        let mut orders = self.orders.write().expect("order cache lock poisoned");
        orders.insert(uid.clone(), order);
        drop(orders);
        tracing::debug!(order_uid = %uid, "Order added to cache");
    }

    /// Pure in-memory lookup; never touches the store.
    pub fn get(&self, order_uid: &str) -> Option<Order> {
        let orders = self.orders.read().expect("order cache lock poisoned");
        orders.get(order_uid).cloned()
    }

    /// Number of distinct keys currently cached.
    pub fn count(&self) -> usize {
        let orders = self.orders.read().expect("order cache lock poisoned");
        orders.len()
    }

    /// Bulk-populates the cache from a full scan of the store at startup.
    ///
    /// A fetch failure aborts population and must be treated as fatal by the
    /// caller: a partially-warmed cache is not guaranteed consistent.
    pub async fn warm(&self, store: &dyn OrderStore) -> Result<usize, StoreError> {
        let orders = store.find_all().await?;
        let loaded = orders.len();
        for order in orders {
            self.add(order);
        }
        tracing::info!(loaded, "Cache warmed from store");
        Ok(loaded)
    }
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::new()
    }
}
