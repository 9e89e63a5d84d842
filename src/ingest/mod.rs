use std::sync::Arc;

use bytes::Bytes;

use crate::cache::OrderCache;
use crate::messaging::MessageHandler;
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::{OrderStore, StoreError};

// ============================================================================
// Ingestion Pipeline
// ============================================================================
//
// Per-message path: deserialize -> validate -> cache dedupe -> store dedupe
// -> store write -> cache insert. Every failure is contained to the single
// message: log, record the outcome, drop. Nothing here retries and nothing
// here panics.
//
// The dedupe checks are not atomic with the write. Two handlers processing
// the same order_uid concurrently can both pass the "absent" checks; the
// store's uniqueness constraint is the backstop, and the resulting
// `StoreError::Duplicate` is folded into the cache as a normal dedupe
// outcome rather than treated as a failure.
// ============================================================================

/// What happened to one delivered message. Duplicates are normal outcomes,
/// not errors: at-least-once delivery makes them the common case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New order written to the store and cached.
    Stored,
    /// Dedupe hit in the cache; nothing touched the store.
    AlreadyCached,
    /// Dedupe hit in the store (or its uniqueness constraint); cache was
    /// populated from the store's authoritative copy.
    AlreadyStored,
    /// Payload was not a valid order document; dropped.
    Malformed,
    /// Order failed field validation; dropped.
    Invalid,
    /// Store read or write failed; message dropped after logging.
    StoreUnavailable,
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Stored => "stored",
            IngestOutcome::AlreadyCached => "already_cached",
            IngestOutcome::AlreadyStored => "already_stored",
            IngestOutcome::Malformed => "malformed",
            IngestOutcome::Invalid => "invalid",
            IngestOutcome::StoreUnavailable => "store_unavailable",
        }
    }
}

pub struct IngestPipeline {
    cache: Arc<OrderCache>,
    store: Arc<dyn OrderStore>,
    metrics: Arc<Metrics>,
}

impl IngestPipeline {
    pub fn new(cache: Arc<OrderCache>, store: Arc<dyn OrderStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            store,
            metrics,
        }
    }

    /// Processes one raw bus payload to completion.
    pub async fn process(&self, payload: &[u8]) -> IngestOutcome {
        let outcome = self.run(payload).await;
        self.metrics.record_ingest(outcome.label());
        self.metrics.set_cache_size(self.cache.count());
        outcome
    }

    async fn run(&self, payload: &[u8]) -> IngestOutcome {
        let order: Order = match serde_json::from_slice(payload) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed message");
                return IngestOutcome::Malformed;
            }
        };

        if let Err(err) = order.validate() {
            tracing::warn!(order_uid = %order.order_uid, error = %err, "Dropping invalid order");
            return IngestOutcome::Invalid;
        }

        // Dedupe check 1: the cache. Hot path for redelivered messages.
        if self.cache.get(&order.order_uid).is_some() {
            tracing::debug!(order_uid = %order.order_uid, "Order already cached");
            return IngestOutcome::AlreadyCached;
        }

        // Dedupe check 2: the store. Hits after a cache restart; the stored
        // copy is authoritative, so it, not the payload, populates the cache.
        match self.store.find_by_uid(&order.order_uid).await {
            Ok(Some(stored)) => {
                tracing::info!(order_uid = %order.order_uid, "Order already stored, caching store copy");
                self.cache.add(stored);
                return IngestOutcome::AlreadyStored;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(order_uid = %order.order_uid, error = %err, "Store lookup failed, dropping message");
                return IngestOutcome::StoreUnavailable;
            }
        }

        match self.store.create(&order).await {
            Ok(()) => {
                tracing::info!(order_uid = %order.order_uid, "Order stored and cached");
                self.cache.add(order);
                IngestOutcome::Stored
            }
            Err(StoreError::Duplicate(order_uid)) => {
                // Lost the write race against a concurrent delivery of the
                // same key. The row exists; fold it into the cache.
                tracing::info!(order_uid = %order_uid, "Concurrent duplicate write, caching store copy");
                match self.store.find_by_uid(&order_uid).await {
                    Ok(Some(stored)) => self.cache.add(stored),
                    Ok(None) => {
                        tracing::warn!(order_uid = %order_uid, "Duplicate reported but order not readable yet");
                    }
                    Err(err) => {
                        tracing::error!(order_uid = %order_uid, error = %err, "Read-back after duplicate failed");
                    }
                }
                IngestOutcome::AlreadyStored
            }
            Err(err) => {
                tracing::error!(order_uid = %order.order_uid, error = %err, "Store write failed, dropping message");
                IngestOutcome::StoreUnavailable
            }
        }
    }
}

/// Adapts the pipeline into the bus handler signature.
pub fn message_handler(pipeline: Arc<IngestPipeline>) -> MessageHandler {
    Arc::new(move |payload: Bytes| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline.process(&payload).await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::{sample_order, SAMPLE_ORDER_JSON};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store with switches for each failure mode the pipeline
    /// has to contain.
    #[derive(Default)]
    struct MockStore {
        orders: Mutex<HashMap<String, Order>>,
        create_calls: AtomicUsize,
        fail_all: AtomicBool,
        /// Report the key absent exactly once, simulating the window where a
        /// concurrent handler has passed the dedupe check but already won
        /// the write race by the time we insert.
        hide_first_find: AtomicBool,
    }

    impl MockStore {
        fn with_order(order: Order) -> Self {
            let store = Self::default();
            store
                .orders
                .lock()
                .unwrap()
                .insert(order.order_uid.clone(), order);
            store
        }
    }

    #[async_trait::async_trait]
    impl OrderStore for MockStore {
        async fn find_by_uid(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            if self.hide_first_find.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(self.orders.lock().unwrap().get(order_uid).cloned())
        }

        async fn create(&self, order: &Order) -> Result<(), StoreError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            let mut orders = self.orders.lock().unwrap();
            if orders.contains_key(&order.order_uid) {
                return Err(StoreError::Duplicate(order.order_uid.clone()));
            }
            orders.insert(order.order_uid.clone(), order.clone());
            Ok(())
        }

        async fn find_all(&self) -> Result<Vec<Order>, StoreError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            Ok(self.orders.lock().unwrap().values().cloned().collect())
        }
    }

    fn pipeline_with(store: Arc<MockStore>) -> (IngestPipeline, Arc<OrderCache>) {
        let cache = Arc::new(OrderCache::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        (
            IngestPipeline::new(cache.clone(), store, metrics),
            cache,
        )
    }

    #[tokio::test]
    async fn test_new_order_is_stored_and_cached() {
        let store = Arc::new(MockStore::default());
        let (pipeline, cache) = pipeline_with(store.clone());

        let outcome = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;

        assert_eq!(outcome, IngestOutcome::Stored);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("b563feb7b2b84b6test").is_some());
    }

    #[tokio::test]
    async fn test_redelivery_writes_store_exactly_once() {
        let store = Arc::new(MockStore::default());
        let (pipeline, cache) = pipeline_with(store.clone());

        let first = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;
        let second = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;

        assert_eq!(first, IngestOutcome::Stored);
        assert_eq!(second, IngestOutcome::AlreadyCached);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_without_store_access() {
        let store = Arc::new(MockStore::default());
        let (pipeline, cache) = pipeline_with(store.clone());

        let outcome = pipeline.process(b"{not json").await;

        assert_eq!(outcome, IngestOutcome::Malformed);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_order_missing_uid_is_rejected() {
        let store = Arc::new(MockStore::default());
        let (pipeline, cache) = pipeline_with(store.clone());

        let mut order = sample_order();
        order.order_uid.clear();
        let payload = serde_json::to_vec(&order).unwrap();

        let outcome = pipeline.process(&payload).await;

        assert_eq!(outcome, IngestOutcome::Invalid);
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_stored_but_uncached_order_caches_store_copy() {
        // Cache restart scenario: the store already holds the order, and its
        // copy (not the payload's) must win.
        let mut stored = sample_order();
        stored.locale = "ru".to_string();
        let store = Arc::new(MockStore::with_order(stored.clone()));
        let (pipeline, cache) = pipeline_with(store.clone());

        let outcome = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;

        assert_eq!(outcome, IngestOutcome::AlreadyStored);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.get(&stored.order_uid).unwrap().locale, "ru");
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_write_is_folded_into_cache() {
        // Both handlers pass the absent checks; the second insert trips the
        // uniqueness constraint and must end as a dedupe, not a failure.
        let store = Arc::new(MockStore::with_order(sample_order()));
        store.hide_first_find.store(true, Ordering::SeqCst);
        let (pipeline, cache) = pipeline_with(store.clone());

        let outcome = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;

        assert_eq!(outcome, IngestOutcome::AlreadyStored);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("b563feb7b2b84b6test").is_some());
    }

    #[tokio::test]
    async fn test_store_outage_drops_message_without_caching() {
        let store = Arc::new(MockStore::default());
        store.fail_all.store(true, Ordering::SeqCst);
        let (pipeline, cache) = pipeline_with(store.clone());

        let outcome = pipeline.process(SAMPLE_ORDER_JSON.as_bytes()).await;

        assert_eq!(outcome, IngestOutcome::StoreUnavailable);
        assert_eq!(cache.count(), 0);
    }
}
