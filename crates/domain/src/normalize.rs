//! Canonical representation of an order pushed in by an external
//! delivery platform, plus the helpers the per-platform normalizers
//! share. Each platform sends structurally different JSON; the
//! connectors map every shape onto [`NormalizedOrder`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{DeliveryType, ExternalPlatform, NewOrder, NewOrderItem, OrderStatus};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

/// Platform-independent order-creation record produced by the
/// per-platform normalizers and consumed by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub external_order_id: String,
    pub platform: ExternalPlatform,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub delivery_address: Option<String>,
    pub delivery_type: DeliveryType,
    pub payment_method: String,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub items: Vec<NormalizedItem>,
    pub notes: Option<String>,
}

impl NormalizedOrder {
    /// Sum of line totals, used when the payload carries no subtotal.
    pub fn items_subtotal(&self) -> Decimal {
        self.items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum()
    }

    /// Build the repository insert records. The total invariant is
    /// re-established here: total is always subtotal + delivery fee,
    /// even when the platform reported a diverging figure.
    pub fn into_order_records(self, tenant_id: Uuid, status: OrderStatus) -> (NewOrder, Vec<NewOrderItem>) {
        let subtotal = if self.subtotal.is_zero() && !self.total.is_zero() {
            self.total - self.delivery_fee
        } else {
            self.subtotal
        };
        let total = subtotal + self.delivery_fee;
        let order = NewOrder {
            tenant_id,
            customer_id: None,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            customer_email: self.customer_email,
            delivery_address: self.delivery_address,
            address_latitude: None,
            address_longitude: None,
            order_notes: self.notes,
            status,
            subtotal,
            delivery_fee: self.delivery_fee,
            total,
            delivery_type: self.delivery_type,
            payment_method: self.payment_method,
            external_platform: Some(self.platform),
            external_order_id: Some(self.external_order_id),
        };
        let items = self
            .items
            .into_iter()
            .map(|i| NewOrderItem {
                product_id: None,
                name: i.name,
                price: i.unit_price,
                quantity: i.quantity,
                notes: i.notes,
            })
            .collect();
        (order, items)
    }
}

/// Parse a JSON money value into a `Decimal` without ever routing the
/// number through f64. Numbers are read via their decimal rendering,
/// strings are parsed directly.
pub fn decimal_from_json(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Money field with the documented missing-total behavior: absent or
/// malformed values degrade to zero and are logged as a data-quality
/// event, never raised as an error.
pub fn money_or_zero(value: Option<&Value>, field: &str, platform: ExternalPlatform) -> Decimal {
    match decimal_from_json(value) {
        Some(v) => v,
        None => {
            tracing::warn!(platform = %platform, field, "missing monetary field, defaulting to zero");
            Decimal::ZERO
        }
    }
}

/// Integer minor units (e.g. Uber Eats cents) into a 2-dp decimal.
pub fn decimal_from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

pub fn string_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_money_never_goes_through_floats() {
        let v = json!(45.90);
        assert_eq!(
            decimal_from_json(Some(&v)).unwrap(),
            "45.90".parse::<Decimal>().unwrap()
        );
        // A value that loses precision as f64 survives the string path.
        let v = json!("0.10");
        assert_eq!(
            decimal_from_json(Some(&v)).unwrap(),
            Decimal::new(10, 2)
        );
        assert_eq!(decimal_from_json(Some(&json!(null))), None);
        assert_eq!(decimal_from_json(None), None);
    }

    #[test]
    fn minor_units_convert_exactly() {
        assert_eq!(decimal_from_minor_units(4590), "45.90".parse::<Decimal>().unwrap());
        assert_eq!(decimal_from_minor_units(0), Decimal::ZERO);
    }

    #[test]
    fn order_records_reestablish_total_invariant() {
        let normalized = NormalizedOrder {
            external_order_id: "ext-1".into(),
            platform: ExternalPlatform::Ifood,
            customer_name: "Maria".into(),
            customer_phone: "+5511999990000".into(),
            customer_email: None,
            delivery_address: Some("Rua A, 10".into()),
            delivery_type: DeliveryType::Delivery,
            payment_method: "ifood".into(),
            subtotal: "40.90".parse().unwrap(),
            delivery_fee: "5.00".parse().unwrap(),
            total: "99.99".parse().unwrap(), // platform-reported figure is ignored
            items: vec![],
            notes: None,
        };
        let (order, _) = normalized.into_order_records(Uuid::new_v4(), OrderStatus::Confirmed);
        assert_eq!(order.total, order.subtotal + order.delivery_fee);
        assert_eq!(order.total, "45.90".parse::<Decimal>().unwrap());
    }

    #[test]
    fn subtotal_backfilled_from_total_when_absent() {
        let normalized = NormalizedOrder {
            external_order_id: "ext-2".into(),
            platform: ExternalPlatform::UberEats,
            customer_name: "Cliente Uber Eats".into(),
            customer_phone: String::new(),
            customer_email: None,
            delivery_address: None,
            delivery_type: DeliveryType::Delivery,
            payment_method: "ubereats".into(),
            subtotal: Decimal::ZERO,
            delivery_fee: Decimal::ZERO,
            total: "30.00".parse().unwrap(),
            items: vec![],
            notes: None,
        };
        let (order, _) = normalized.into_order_records(Uuid::new_v4(), OrderStatus::Confirmed);
        assert_eq!(order.subtotal, "30.00".parse::<Decimal>().unwrap());
        assert_eq!(order.total, "30.00".parse::<Decimal>().unwrap());
    }
}
