use anyhow::Result;

use crate::models::Order;

// ============================================================================
// Test-message generation
// ============================================================================

/// The canonical order document used across tests and as the seed template.
pub const SAMPLE_ORDER_JSON: &str = r#"{
  "order_uid": "b563feb7b2b84b6test",
  "track_number": "WBILMTESTTRACK",
  "entry": "WBIL",
  "delivery": {
    "name": "Test Testov",
    "phone": "+9720000000",
    "zip": "2639809",
    "city": "Kiryat Mozkin",
    "address": "Ploshad Mira 15",
    "region": "Kraiot",
    "email": "test@gmail.com"
  },
  "payment": {
    "transaction": "b563feb7b2b84b6test",
    "request_id": "",
    "currency": "USD",
    "provider": "wbpay",
    "amount": 1817,
    "payment_dt": 1637907727,
    "bank": "alpha",
    "delivery_cost": 1500,
    "goods_total": 317,
    "custom_fee": 0
  },
  "items": [
    {
      "chrt_id": 9934930,
      "track_number": "WBILMTESTTRACK",
      "price": 453,
      "rid": "ab4219087a764ae0btest",
      "name": "Mascaras",
      "sale": 30,
      "size": "0",
      "total_price": 317,
      "nm_id": 2389212,
      "brand": "Vivienne Sabo",
      "status": 202
    }
  ],
  "locale": "en",
  "internal_signature": "",
  "customer_id": "test",
  "delivery_service": "meest",
  "shardkey": "9",
  "sm_id": 99,
  "date_created": "2021-11-26T06:22:19Z",
  "oof_shard": "1"
}"#;

/// Parses the canonical sample into an `Order`.
pub fn sample_order() -> Order {
    serde_json::from_str(SAMPLE_ORDER_JSON).expect("canonical sample must parse")
}

/// Produces `count` valid order payloads with distinct `order_uid`s, for
/// seeding the bus in demos and load checks.
pub fn generate_messages(count: usize) -> Result<Vec<String>> {
    let mut messages = Vec::with_capacity(count);
    let template = sample_order();

    for i in 0..count {
        let mut order = template.clone();
        order.order_uid = format!("b563feb7b2b84b6test{i}");
        order.payment.transaction = order.order_uid.clone();
        order.payment.amount = template.payment.amount + i as i64;
        order.items[0].chrt_id = template.items[0].chrt_id + i as i64;
        order.date_created = chrono::Utc::now();

        messages.push(serde_json::to_string(&order)?);
    }

    Ok(messages)
}
