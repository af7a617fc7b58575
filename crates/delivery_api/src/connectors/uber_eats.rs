//! Uber Eats webhook payloads. Two shapes exist in the wild: the flat
//! notification (`order_id`, `customer`, `order_total` in major units)
//! and the full order resource (`eater`, `cart`, integer-cent money).
//! Both normalize to the same canonical record.

use serde_json::Value;

use domain::normalize::{
    decimal_from_json, decimal_from_minor_units, money_or_zero, string_field, NormalizedItem,
};
use domain::{DeliveryType, ExternalPlatform, NormalizedOrder};

pub fn normalize(payload: &Value) -> Result<NormalizedOrder, String> {
    let external_order_id = string_field(payload.get("order_id"))
        .or_else(|| string_field(payload.get("id")))
        .or_else(|| {
            payload
                .get("meta")
                .and_then(|m| m.get("resource_id"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| "missing order id".to_string())?;

    // Flat shape first; eater/cart resource shape as fallback.
    let customer_name = payload
        .get("customer")
        .and_then(|c| string_field(c.get("name")))
        .or_else(|| eater_name(payload))
        .unwrap_or_else(|| {
            ExternalPlatform::UberEats
                .placeholder_customer_name()
                .to_string()
        });
    let customer_phone = payload
        .get("customer")
        .and_then(|c| string_field(c.get("phone")))
        .or_else(|| {
            payload
                .get("eater")
                .and_then(|e| string_field(e.get("phone")))
        })
        .unwrap_or_default();
    let customer_email = payload
        .get("customer")
        .and_then(|c| string_field(c.get("email")));

    let delivery_address = string_field(payload.get("delivery_address"));

    let items = if let Some(flat) = payload.get("items").and_then(|v| v.as_array()) {
        flat.iter()
            .map(|item| NormalizedItem {
                name: string_field(item.get("title"))
                    .or_else(|| string_field(item.get("name")))
                    .unwrap_or_else(|| "Item".to_string()),
                quantity: item.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1) as i32,
                unit_price: decimal_from_json(item.get("price")).unwrap_or_default(),
                notes: string_field(item.get("special_instructions")),
            })
            .collect()
    } else {
        cart_items(payload)
    };

    let total = if let Some(value) = payload.get("order_total").or_else(|| payload.get("total")) {
        money_or_zero(Some(value), "order_total", ExternalPlatform::UberEats)
    } else if let Some(cents) = payload
        .get("payment")
        .and_then(|p| p.get("charges"))
        .and_then(|c| c.get("total"))
        .and_then(|t| t.get("amount"))
        .and_then(|v| v.as_i64())
    {
        decimal_from_minor_units(cents)
    } else {
        money_or_zero(None, "order_total", ExternalPlatform::UberEats)
    };

    let notes = string_field(payload.get("notes")).or_else(|| {
        payload
            .get("cart")
            .and_then(|c| string_field(c.get("special_instructions")))
    });

    Ok(NormalizedOrder {
        external_order_id,
        platform: ExternalPlatform::UberEats,
        customer_name,
        customer_phone,
        customer_email,
        delivery_address,
        delivery_type: DeliveryType::Delivery,
        payment_method: "ubereats".to_string(),
        subtotal: rust_decimal::Decimal::ZERO,
        delivery_fee: rust_decimal::Decimal::ZERO,
        total,
        items,
        notes,
    })
}

fn eater_name(payload: &Value) -> Option<String> {
    let eater = payload.get("eater")?;
    let first = string_field(eater.get("first_name"));
    let last = string_field(eater.get("last_name"));
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first),
        _ => None,
    }
}

fn cart_items(payload: &Value) -> Vec<NormalizedItem> {
    let Some(items) = payload
        .get("cart")
        .and_then(|c| c.get("items"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let unit_price = item
                .get("price")
                .and_then(|p| p.get("unit_price"))
                .and_then(|u| u.get("amount"))
                .and_then(|v| v.as_i64())
                .map(decimal_from_minor_units)
                .unwrap_or_default();
            NormalizedItem {
                name: string_field(item.get("title")).unwrap_or_else(|| "Item".to_string()),
                quantity: item.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1) as i32,
                unit_price,
                notes: string_field(item.get("special_instructions")),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn normalizes_flat_notification_shape() {
        let payload = json!({
            "event": "order.created",
            "order_id": "UE-100",
            "customer": { "name": "Ana", "phone": "11977776666" },
            "delivery_address": "Rua Verde, 7",
            "items": [ { "title": "Burger", "quantity": 1, "price": 25.50 } ],
            "order_total": 30.50
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.external_order_id, "UE-100");
        assert_eq!(normalized.total, "30.50".parse::<Decimal>().unwrap());
        assert_eq!(normalized.items[0].unit_price, "25.50".parse::<Decimal>().unwrap());
        assert_eq!(normalized.payment_method, "ubereats");
    }

    #[test]
    fn normalizes_cart_resource_shape_with_minor_units() {
        let payload = json!({
            "id": "UE-200",
            "eater": { "first_name": "Bruno", "last_name": "Dias", "phone": "11966665555" },
            "cart": {
                "items": [
                    { "title": "Combo", "quantity": 2, "price": { "unit_price": { "amount": 1990 } } }
                ],
                "special_instructions": "sem cebola"
            },
            "payment": { "charges": { "total": { "amount": 4580 } } }
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.customer_name, "Bruno Dias");
        assert_eq!(normalized.total, "45.80".parse::<Decimal>().unwrap());
        assert_eq!(
            normalized.items[0].unit_price,
            "19.90".parse::<Decimal>().unwrap()
        );
        assert_eq!(normalized.notes.as_deref(), Some("sem cebola"));
    }

    #[test]
    fn missing_total_defaults_to_zero() {
        let payload = json!({ "order_id": "UE-300", "items": [] });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.total, Decimal::ZERO);
        assert_eq!(normalized.customer_name, "Cliente Uber Eats");
    }
}
