//! Best-effort mapping for partners without a dedicated connector:
//! a flat payload with common field names.

use serde_json::Value;

use domain::normalize::{decimal_from_json, money_or_zero, string_field, NormalizedItem};
use domain::{DeliveryType, ExternalPlatform, NormalizedOrder};

pub fn normalize(payload: &Value) -> Result<NormalizedOrder, String> {
    let external_order_id = string_field(payload.get("order_id"))
        .or_else(|| string_field(payload.get("id")))
        .ok_or_else(|| "missing order id".to_string())?;

    let customer = payload.get("customer");
    let items = payload
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| NormalizedItem {
                    name: string_field(item.get("name")).unwrap_or_else(|| "Item".to_string()),
                    quantity: item.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1) as i32,
                    unit_price: decimal_from_json(item.get("unit_price"))
                        .or_else(|| decimal_from_json(item.get("price")))
                        .unwrap_or_default(),
                    notes: string_field(item.get("notes")),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalizedOrder {
        external_order_id,
        platform: ExternalPlatform::Generic,
        customer_name: customer
            .and_then(|c| string_field(c.get("name")))
            .unwrap_or_else(|| {
                ExternalPlatform::Generic
                    .placeholder_customer_name()
                    .to_string()
            }),
        customer_phone: customer
            .and_then(|c| string_field(c.get("phone")))
            .unwrap_or_default(),
        customer_email: customer.and_then(|c| string_field(c.get("email"))),
        delivery_address: string_field(payload.get("delivery_address")),
        delivery_type: DeliveryType::Delivery,
        payment_method: string_field(payload.get("payment_method"))
            .unwrap_or_else(|| "external".to_string()),
        subtotal: decimal_from_json(payload.get("subtotal")).unwrap_or_default(),
        delivery_fee: decimal_from_json(payload.get("delivery_fee")).unwrap_or_default(),
        total: money_or_zero(payload.get("total"), "total", ExternalPlatform::Generic),
        items,
        notes: string_field(payload.get("notes")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn flat_fields_map_directly() {
        let payload = json!({
            "id": "EXT-5",
            "customer": { "name": "Rui", "phone": "11912341234" },
            "items": [ { "name": "Prato do dia", "quantity": 1, "price": "18.50" } ],
            "total": "18.50"
        });
        let normalized = normalize(&payload).unwrap();
        assert_eq!(normalized.external_order_id, "EXT-5");
        assert_eq!(normalized.total, "18.50".parse::<Decimal>().unwrap());
        assert_eq!(
            normalized.items[0].unit_price,
            "18.50".parse::<Decimal>().unwrap()
        );
    }
}
