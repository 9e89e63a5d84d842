use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the two hot paths:
// - HTTP lookups (request counts, cache/db/overall latency split)
// - Ingestion (message counts by outcome, current cache size)
//
// All metrics hang off one explicit registry passed to the HTTP surface for
// scraping; there is no global registry state.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // HTTP read path
    pub http_requests_total: IntCounterVec,
    pub cache_response_time: HistogramVec,
    pub db_response_time: HistogramVec,
    pub overall_response_time: HistogramVec,

    // Ingestion path
    pub ingest_messages_total: IntCounterVec,
    pub cache_size: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["path"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let cache_response_time = HistogramVec::new(
            HistogramOpts::new("http_cache_response_time_seconds", "Cache lookup latency")
                .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1]),
            &["path"],
        )?;
        registry.register(Box::new(cache_response_time.clone()))?;

        let db_response_time = HistogramVec::new(
            HistogramOpts::new("http_db_response_time_seconds", "Database lookup latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["path"],
        )?;
        registry.register(Box::new(db_response_time.clone()))?;

        let overall_response_time = HistogramVec::new(
            HistogramOpts::new("http_overall_response_time_seconds", "Handler latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["path"],
        )?;
        registry.register(Box::new(overall_response_time.clone()))?;

        let ingest_messages_total = IntCounterVec::new(
            Opts::new("ingest_messages_total", "Ingested bus messages by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_messages_total.clone()))?;

        let cache_size = IntGauge::new("order_cache_size", "Orders currently cached")?;
        registry.register(Box::new(cache_size.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            cache_response_time,
            db_response_time,
            overall_response_time,
            ingest_messages_total,
            cache_size,
        })
    }

    /// Registry handle for the scrape endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, path: &str, overall_secs: f64) {
        self.http_requests_total.with_label_values(&[path]).inc();
        self.overall_response_time
            .with_label_values(&[path])
            .observe(overall_secs);
    }

    pub fn observe_cache_lookup(&self, path: &str, secs: f64) {
        self.cache_response_time
            .with_label_values(&[path])
            .observe(secs);
    }

    pub fn observe_db_lookup(&self, path: &str, secs: f64) {
        self.db_response_time.with_label_values(&[path]).observe(secs);
    }

    pub fn record_ingest(&self, outcome: &str) {
        self.ingest_messages_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_cache_size(&self, size: usize) {
        self.cache_size.set(size as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_ingest_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_ingest("stored");
        metrics.record_ingest("stored");
        metrics.record_ingest("already_cached");

        let gathered = metrics.registry.gather();
        let ingested = gathered
            .iter()
            .find(|m| m.name() == "ingest_messages_total")
            .unwrap();
        assert_eq!(ingested.metric.len(), 2); // Two distinct outcome labels
    }

    #[test]
    fn test_record_request_counts_path() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/order", 0.002);
        metrics.record_request("/order", 0.004);

        let gathered = metrics.registry.gather();
        let requests = gathered
            .iter()
            .find(|m| m.name() == "http_requests_total")
            .unwrap();
        assert_eq!(requests.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_cache_size_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.set_cache_size(42);

        let gathered = metrics.registry.gather();
        let gauge = gathered
            .iter()
            .find(|m| m.name() == "order_cache_size")
            .unwrap();
        assert_eq!(gauge.metric[0].gauge.value, Some(42.0));
    }
}
