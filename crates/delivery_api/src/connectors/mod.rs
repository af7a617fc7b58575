//! Per-platform webhook connectors. Each external marketplace sends a
//! structurally different payload; every module here maps its shape
//! onto the canonical `NormalizedOrder` and shares one event
//! vocabulary and one HMAC verification scheme.

use serde_json::Value;

use domain::{ExternalPlatform, NormalizedOrder, OrderStatus};

pub mod ifood;
pub mod quero;
pub mod uber_eats;

mod generic;

/// Canonical interpretation of an external status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMapping {
    pub status: OrderStatus,
    /// Cancellations never trigger a customer notification.
    pub notify_customer: bool,
}

/// External event vocabulary onto the canonical status set. Events
/// arrive namespaced ("order.created"); only the final segment counts.
pub fn map_external_event(event: &str) -> Option<EventMapping> {
    let name = event.rsplit('.').next().unwrap_or(event);
    let (status, notify_customer) = match name {
        "placed" | "created" => (OrderStatus::Confirmed, true),
        "confirmed" | "accepted" => (OrderStatus::Confirmed, true),
        "preparing" => (OrderStatus::Preparing, true),
        "ready" => (OrderStatus::Ready, true),
        "dispatched" | "picked_up" | "in_transit" => (OrderStatus::OutForDelivery, true),
        "delivered" => (OrderStatus::Delivered, true),
        "cancelled" | "canceled" => (OrderStatus::Cancelled, false),
        _ => return None,
    };
    Some(EventMapping {
        status,
        notify_customer,
    })
}

/// Platform-specific event field, defaulting to order creation when the
/// payload carries no event name at all (several integrations push bare
/// order bodies on creation).
pub fn extract_event(platform: ExternalPlatform, payload: &Value) -> String {
    let field = match platform {
        ExternalPlatform::UberEats => payload
            .get("event_type")
            .or_else(|| payload.get("event"))
            .and_then(|v| v.as_str()),
        _ => payload.get("event").and_then(|v| v.as_str()),
    };
    field.unwrap_or("order.created").to_string()
}

pub fn normalize_for(
    platform: ExternalPlatform,
    payload: &Value,
) -> Result<NormalizedOrder, String> {
    match platform {
        ExternalPlatform::Ifood => ifood::normalize(payload),
        ExternalPlatform::UberEats => uber_eats::normalize(payload),
        ExternalPlatform::QueroDelivery => quero::normalize(payload),
        ExternalPlatform::Generic => generic::normalize(payload),
    }
}

/// HMAC-SHA256 over the raw body, hex-encoded, compared in constant
/// time. This is the shared signing scheme for all platform webhooks.
pub fn verify_signature_hex(secret: &str, body: &[u8], provided_sig: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);
    constant_time_eq_hex(&expected_hex, provided_sig.trim())
}

pub(crate) fn constant_time_eq_hex(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_vocabulary_maps_to_canonical_statuses() {
        assert_eq!(
            map_external_event("order.placed").map(|m| m.status),
            Some(OrderStatus::Confirmed)
        );
        assert_eq!(
            map_external_event("order.accepted").map(|m| m.status),
            Some(OrderStatus::Confirmed)
        );
        assert_eq!(
            map_external_event("order.picked_up").map(|m| m.status),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(
            map_external_event("order.in_transit").map(|m| m.status),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(
            map_external_event("delivered").map(|m| m.status),
            Some(OrderStatus::Delivered)
        );
        assert!(map_external_event("order.refund_requested").is_none());
    }

    #[test]
    fn cancellation_suppresses_notification() {
        let mapping = map_external_event("order.cancelled").unwrap();
        assert_eq!(mapping.status, OrderStatus::Cancelled);
        assert!(!mapping.notify_customer);

        let mapping = map_external_event("order.ready").unwrap();
        assert!(mapping.notify_customer);
    }

    #[test]
    fn signature_verification_round_trip() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let secret = "whsec_test";
        let body = br#"{"event":"order.created"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature_hex(secret, body, &sig));
        assert!(!verify_signature_hex(secret, body, "deadbeef"));
        assert!(!verify_signature_hex("other", body, &sig));
    }
}
