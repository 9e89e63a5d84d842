use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain Models
// ============================================================================
//
// `Order` is the aggregate root. Its sub-entities (Delivery, Payment, Items)
// have no identity of their own: they are owned by the order, serialized with
// it, and destroyed with it. Orders are immutable once persisted; the only
// write path in this system is create-if-absent keyed by `order_uid`.
//
// Field names follow the wire schema exactly (snake_case JSON).
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    /// Globally unique identifier; the sole lookup key across store and cache.
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("order is missing order_uid")]
    MissingOrderUid,

    #[error("order is missing track_number")]
    MissingTrackNumber,
}

impl Order {
    /// Checks the fields an order must carry before it may be persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_uid.is_empty() {
            return Err(ValidationError::MissingOrderUid);
        }
        if self.track_number.is_empty() {
            return Err(ValidationError::MissingTrackNumber);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::SAMPLE_ORDER_JSON;

    #[test]
    fn test_canonical_message_round_trip() {
        let order: Order = serde_json::from_str(SAMPLE_ORDER_JSON).unwrap();

        assert_eq!(order.order_uid, "b563feb7b2b84b6test");
        assert_eq!(order.track_number, "WBILMTESTTRACK");
        assert_eq!(order.entry, "WBIL");
        assert_eq!(order.delivery.name, "Test Testov");
        assert_eq!(order.delivery.city, "Kiryat Mozkin");
        assert_eq!(order.payment.transaction, "b563feb7b2b84b6test");
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.payment.payment_dt, 1637907727);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].chrt_id, 9934930);
        assert_eq!(order.items[0].brand, "Vivienne Sabo");
        assert_eq!(order.sm_id, 99);
        assert_eq!(order.oof_shard, "1");

        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }

    #[test]
    fn test_validate_accepts_complete_order() {
        let order: Order = serde_json::from_str(SAMPLE_ORDER_JSON).unwrap();
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_order_uid() {
        let mut order: Order = serde_json::from_str(SAMPLE_ORDER_JSON).unwrap();
        order.order_uid.clear();
        assert_eq!(order.validate(), Err(ValidationError::MissingOrderUid));
    }

    #[test]
    fn test_validate_rejects_empty_track_number() {
        let mut order: Order = serde_json::from_str(SAMPLE_ORDER_JSON).unwrap();
        order.track_number.clear();
        assert_eq!(order.validate(), Err(ValidationError::MissingTrackNumber));
    }

    #[test]
    fn test_optional_fields_default_when_absent() {
        // request_id and internal_signature may be omitted by producers.
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE_ORDER_JSON).unwrap();
        value.as_object_mut().unwrap().remove("internal_signature");
        value["payment"].as_object_mut().unwrap().remove("request_id");

        let order: Order = serde_json::from_value(value).unwrap();
        assert_eq!(order.internal_signature, "");
        assert_eq!(order.payment.request_id, "");
    }
}
