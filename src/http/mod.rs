use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};

use crate::cache::OrderCache;
use crate::messaging::NatsClient;
use crate::metrics::Metrics;
use crate::store::OrderStore;

// ============================================================================
// HTTP surface - thin callers into the cache, store and bus
// ============================================================================

pub struct AppState {
    pub cache: Arc<OrderCache>,
    pub store: Arc<dyn OrderStore>,
    pub bus: Arc<NatsClient>,
    pub metrics: Arc<Metrics>,
    /// Topic the publish endpoint forwards to.
    pub channel: String,
}

pub async fn run_server(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    tracing::info!("Starting HTTP server on http://0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/order/{order_uid}", web::get().to(get_order))
            .route("/publish", web::post().to(publish))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

/// Cache-first lookup; on a miss the store copy is returned and cached.
async fn get_order(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> impl Responder {
    let order_uid = path.into_inner();
    let overall_start = Instant::now();

    let cache_start = Instant::now();
    let cached = state.cache.get(&order_uid);
    state
        .metrics
        .observe_cache_lookup("/order", cache_start.elapsed().as_secs_f64());

    if let Some(order) = cached {
        tracing::debug!(order_uid = %order_uid, "Order served from cache");
        state
            .metrics
            .record_request("/order", overall_start.elapsed().as_secs_f64());
        return HttpResponse::Ok().json(order);
    }

    let db_start = Instant::now();
    let found = state.store.find_by_uid(&order_uid).await;
    state
        .metrics
        .observe_db_lookup("/order", db_start.elapsed().as_secs_f64());

    let response = match found {
        Ok(Some(order)) => {
            state.cache.add(order.clone());
            tracing::debug!(order_uid = %order_uid, "Order served from store");
            HttpResponse::Ok().json(order)
        }
        Ok(None) => {
            tracing::debug!(order_uid = %order_uid, "Order not found");
            HttpResponse::NotFound().body("order not found")
        }
        Err(err) => {
            tracing::error!(order_uid = %order_uid, error = %err, "Store lookup failed");
            HttpResponse::InternalServerError().body("store error")
        }
    };

    state
        .metrics
        .record_request("/order", overall_start.elapsed().as_secs_f64());
    response
}

/// Accepts arbitrary JSON and relays the raw bytes to the bus topic.
/// The body is checked to be JSON but never re-modelled.
async fn publish(state: web::Data<Arc<AppState>>, body: web::Bytes) -> impl Responder {
    let overall_start = Instant::now();

    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        state
            .metrics
            .record_request("/publish", overall_start.elapsed().as_secs_f64());
        return HttpResponse::BadRequest().body("invalid JSON");
    }

    let response = match state.bus.publish(&state.channel, body.into()).await {
        Ok(()) => HttpResponse::Ok().body("message published"),
        Err(err) => {
            tracing::error!(error = %err, "Failed to publish message to bus");
            HttpResponse::InternalServerError().body("bus publish failed")
        }
    };

    state
        .metrics
        .record_request("/publish", overall_start.elapsed().as_secs_f64());
    response
}

async fn metrics_handler(state: web::Data<Arc<AppState>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "orderstream"
    }))
}
