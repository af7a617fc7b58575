//! iFood webhook payloads: camelCase fields, money as decimal major
//! units, order body nested under `order`.

use serde::Deserialize;
use serde_json::Value;

use domain::normalize::{decimal_from_json, money_or_zero, string_field, NormalizedItem};
use domain::{DeliveryType, ExternalPlatform, NormalizedOrder};

#[derive(Debug, Deserialize)]
struct IfoodWebhookEvent {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
    order: Option<IfoodOrder>,
}

#[derive(Debug, Deserialize)]
struct IfoodOrder {
    id: Option<String>,
    reference: Option<String>,
    customer: Option<IfoodCustomer>,
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "totalAmount")]
    total_amount: Option<Value>,
    total: Option<Value>,
    #[serde(rename = "deliveryFee")]
    delivery_fee: Option<Value>,
    #[serde(rename = "deliveryAddress")]
    delivery_address: Option<IfoodAddress>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IfoodCustomer {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IfoodAddress {
    address: Option<String>,
    number: Option<String>,
    city: Option<String>,
}

pub fn normalize(payload: &Value) -> Result<NormalizedOrder, String> {
    let event: IfoodWebhookEvent =
        serde_json::from_value(payload.clone()).map_err(|e| format!("malformed payload: {e}"))?;
    let order = event.order.ok_or_else(|| "missing order body".to_string())?;

    // The stable de-duplication key is the merchant-facing reference;
    // the internal id is a fallback.
    let external_order_id = order
        .reference
        .or(order.id)
        .or(event.order_id)
        .ok_or_else(|| "missing order id".to_string())?;

    let customer = order.customer.unwrap_or(IfoodCustomer {
        name: None,
        phone: None,
        email: None,
    });
    let customer_name = customer
        .name
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            ExternalPlatform::Ifood
                .placeholder_customer_name()
                .to_string()
        });
    let customer_email = customer.email.filter(|s| !s.trim().is_empty());

    let delivery_address = order.delivery_address.map(|a| {
        let mut parts: Vec<String> = Vec::new();
        if let Some(address) = a.address.filter(|s| !s.is_empty()) {
            parts.push(address);
        }
        if let Some(number) = a.number.filter(|s| !s.is_empty()) {
            parts.push(number);
        }
        if let Some(city) = a.city.filter(|s| !s.is_empty()) {
            parts.push(city);
        }
        parts.join(", ")
    });

    let items = order
        .items
        .iter()
        .map(|item| NormalizedItem {
            name: string_field(item.get("name"))
                .or_else(|| string_field(item.get("description")))
                .unwrap_or_else(|| "Item".to_string()),
            quantity: item.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1) as i32,
            unit_price: decimal_from_json(item.get("price")).unwrap_or_default(),
            notes: string_field(item.get("notes")),
        })
        .collect();

    let total = money_or_zero(
        order.total_amount.as_ref().or(order.total.as_ref()),
        "totalAmount",
        ExternalPlatform::Ifood,
    );
    let delivery_fee = decimal_from_json(order.delivery_fee.as_ref()).unwrap_or_default();

    Ok(NormalizedOrder {
        external_order_id,
        platform: ExternalPlatform::Ifood,
        customer_name,
        customer_phone: customer.phone.unwrap_or_default(),
        customer_email,
        delivery_address,
        delivery_type: DeliveryType::Delivery,
        payment_method: "ifood".to_string(),
        subtotal: rust_decimal::Decimal::ZERO,
        delivery_fee,
        total,
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
    fn normalizes_a_full_payload() {
        let payload = json!({
            "event": "order.placed",
            "orderId": "abc",
            "order": {
                "id": "abc",
                "reference": "IF-9912",
                "customer": { "name": "Carlos Lima", "phone": "11988887777", "email": "carlos@example.com" },
                "items": [
                    { "name": "Pizza Grande", "quantity": 1, "price": 39.90 },
                    { "name": "Guarana 2L", "quantity": 2, "price": 3.00 }
                ],
                "totalAmount": 45.90,
                "deliveryAddress": { "address": "Rua Azul", "number": "42", "city": "Sao Paulo" }
            }
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.external_order_id, "IF-9912");
        assert_eq!(normalized.total, "45.90".parse::<Decimal>().unwrap());
        assert_eq!(normalized.items.len(), 2);
        assert_eq!(normalized.items[1].quantity, 2);
        assert_eq!(
            normalized.delivery_address.as_deref(),
            Some("Rua Azul, 42, Sao Paulo")
        );
        assert_eq!(normalized.payment_method, "ifood");
    }

    #[test]
    fn missing_optionals_degrade_to_defaults() {
        let payload = json!({
            "order": {
                "id": "IF-1",
                "items": []
            }
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.customer_name, "Cliente iFood");
        assert_eq!(normalized.customer_email, None);
        assert_eq!(normalized.total, Decimal::ZERO);
        assert!(normalized.delivery_address.is_none());
    }

    #[test]
    fn missing_order_id_is_rejected() {
        let payload = json!({ "order": { "customer": { "name": "X" } } });
        assert!(normalize(&payload).is_err());
    }
}
