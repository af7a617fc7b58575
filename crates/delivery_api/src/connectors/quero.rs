//! Quero Delivery webhook payloads: snake_case fields, explicit
//! subtotal/fee/total breakdown, address split into components.

use serde::Deserialize;
use serde_json::Value;

use domain::normalize::{decimal_from_json, money_or_zero, string_field, NormalizedItem};
use domain::{DeliveryType, ExternalPlatform, NormalizedOrder};

#[derive(Debug, Deserialize)]
struct QueroWebhook {
    order: Option<QueroOrder>,
}

#[derive(Debug, Deserialize)]
struct QueroOrder {
    id: Option<String>,
    customer: Option<QueroCustomer>,
    #[serde(default)]
    items: Vec<Value>,
    delivery: Option<QueroDeliveryInfo>,
    subtotal: Option<Value>,
    delivery_fee: Option<Value>,
    total: Option<Value>,
    payment_method: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueroCustomer {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueroDeliveryInfo {
    address: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
}

pub fn normalize(payload: &Value) -> Result<NormalizedOrder, String> {
    let webhook: QueroWebhook =
        serde_json::from_value(payload.clone()).map_err(|e| format!("malformed payload: {e}"))?;
    let order = webhook.order.ok_or_else(|| "missing order body".to_string())?;
    let external_order_id = order.id.ok_or_else(|| "missing order id".to_string())?;

    let customer = order.customer.unwrap_or(QueroCustomer {
        name: None,
        phone: None,
        email: None,
    });

    let delivery_address = order.delivery.map(|d| {
        [d.address, d.neighborhood, d.city]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    });

    let items = order
        .items
        .iter()
        .map(|item| NormalizedItem {
            name: string_field(item.get("name")).unwrap_or_else(|| "Item".to_string()),
            quantity: item.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1) as i32,
            unit_price: decimal_from_json(item.get("unit_price")).unwrap_or_default(),
            notes: string_field(item.get("special_instructions")),
        })
        .collect();

    Ok(NormalizedOrder {
        external_order_id,
        platform: ExternalPlatform::QueroDelivery,
        customer_name: customer
            .name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                ExternalPlatform::QueroDelivery
                    .placeholder_customer_name()
                    .to_string()
            }),
        customer_phone: customer.phone.unwrap_or_default(),
        customer_email: customer.email.filter(|s| !s.trim().is_empty()),
        delivery_address,
        delivery_type: DeliveryType::Delivery,
        payment_method: order
            .payment_method
            .unwrap_or_else(|| "quero_delivery".to_string()),
        subtotal: decimal_from_json(order.subtotal.as_ref()).unwrap_or_default(),
        delivery_fee: decimal_from_json(order.delivery_fee.as_ref()).unwrap_or_default(),
        total: money_or_zero(order.total.as_ref(), "total", ExternalPlatform::QueroDelivery),
        items,
        notes: order.notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn normalizes_with_explicit_breakdown() {
        let payload = json!({
            "event": "order.created",
            "order": {
                "id": "QD-77",
                "customer": { "name": "Paula", "phone": "11955554444", "email": "paula@example.com" },
                "items": [
                    { "product_id": "p1", "name": "Marmita", "quantity": 1, "unit_price": 22.00,
                      "special_instructions": "pouco sal" }
                ],
                "delivery": { "address": "Rua Amarela, 3", "neighborhood": "Centro", "city": "Aracaju" },
                "subtotal": 22.00,
                "delivery_fee": 6.00,
                "total": 28.00,
                "payment_method": "pix",
                "notes": "entregar na portaria"
            },
            "timestamp": "2025-06-01T12:00:00Z"
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.external_order_id, "QD-77");
        assert_eq!(normalized.subtotal, "22.00".parse::<Decimal>().unwrap());
        assert_eq!(normalized.delivery_fee, "6.00".parse::<Decimal>().unwrap());
        assert_eq!(normalized.payment_method, "pix");
        assert_eq!(
            normalized.delivery_address.as_deref(),
            Some("Rua Amarela, 3, Centro, Aracaju")
        );
        assert_eq!(normalized.items[0].notes.as_deref(), Some("pouco sal"));
    }

    #[test]
    fn missing_payment_method_defaults_to_platform() {
        let payload = json!({ "order": { "id": "QD-78", "total": 10.00 } });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.payment_method, "quero_delivery");
        assert_eq!(normalized.customer_name, "Cliente Quero Delivery");
    }
}
