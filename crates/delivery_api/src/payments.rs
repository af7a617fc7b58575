//! Stripe integration: payment-intent creation for checkout and the
//! webhook consumer that reconciles payment state with order state.
//! A succeeded intent confirms the order, a failed intent cancels it,
//! both through one coupled repository operation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use domain::{OrderStatus, PaymentStatus};
use storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEventOutcome {
    /// Payment and order were updated together.
    Applied {
        order_id: Uuid,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },
    /// Event type the platform does not consume; acknowledged so the
    /// sender stops retrying it.
    Ignored { event_type: String },
    /// Recognized event but no matching order/payment on record.
    OrderUnknown { message: String },
    Failed { message: String },
}

/// Stripe signature header: `t=<ts>,v1=<hex hmac>` over `"{t}.{body}"`.
pub fn verify_stripe_signature(sig_header: &str, secret: &str, body: &[u8]) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut timestamp = None;
    let mut signature = None;
    for part in sig_header.split(',') {
        let mut kv = part.splitn(2, '=');
        let k = kv.next().unwrap_or("").trim();
        let v = kv.next().unwrap_or("").trim();
        match k {
            "t" => timestamp = Some(v.to_string()),
            "v1" => signature = Some(v.to_string()),
            _ => {}
        }
    }
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(s)) => (t, s),
        _ => return false,
    };
    let payload = format!("{}.{}", timestamp, String::from_utf8_lossy(body));

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload.as_bytes());
    let expected_hex = hex::encode(mac.finalize().into_bytes());
    crate::connectors::constant_time_eq_hex(&expected_hex, &signature)
}

fn intent_order_id(intent: &Value) -> Option<Uuid> {
    let metadata = intent.get("metadata")?;
    let raw = metadata
        .get("order_id")
        .or_else(|| metadata.get("orderId"))?
        .as_str()?;
    Uuid::parse_str(raw).ok()
}

/// Apply a parsed (and already signature-verified) Stripe event.
pub async fn apply_stripe_event(storage: &dyn Storage, event: &Value) -> StripeEventOutcome {
    let event_type = event
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let intent = event
        .get("data")
        .and_then(|d| d.get("object"))
        .cloned()
        .unwrap_or(Value::Null);

    let (payment_status, order_status) = match event_type.as_str() {
        "payment_intent.succeeded" => (PaymentStatus::Completed, OrderStatus::Confirmed),
        "payment_intent.payment_failed" => (PaymentStatus::Failed, OrderStatus::Cancelled),
        _ => return StripeEventOutcome::Ignored { event_type },
    };

    let Some(order_id) = intent_order_id(&intent) else {
        return StripeEventOutcome::OrderUnknown {
            message: "payment intent carries no order_id metadata".to_string(),
        };
    };

    let payment = match storage.get_payment_by_order(order_id).await {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return StripeEventOutcome::OrderUnknown {
                message: format!("no payment on record for order {order_id}"),
            }
        }
        Err(err) => {
            return StripeEventOutcome::Failed {
                message: err.to_string(),
            }
        }
    };

    // Backfill the provider's intent id before the status flip so the
    // payment row always names the Stripe object that settled it.
    if let Some(intent_id) = intent.get("id").and_then(|v| v.as_str()) {
        if payment.provider_intent_id.as_deref() != Some(intent_id) {
            if let Err(err) = storage.set_payment_intent_id(payment.id, intent_id).await {
                tracing::warn!(payment_id = %payment.id, error = %err, "failed to record intent id");
            }
        }
    }

    match storage
        .update_payment_and_order_status(payment.id, payment_status, order_id, order_status)
        .await
    {
        Ok((payment, order)) => {
            tracing::info!(
                order_id = %order.id,
                payment_id = %payment.id,
                payment_status = %payment.status.as_str(),
                order_status = %order.status,
                "payment reconciled"
            );
            StripeEventOutcome::Applied {
                order_id: order.id,
                payment_status: payment.status,
                order_status: order.status,
            }
        }
        Err(err) => StripeEventOutcome::Failed {
            message: err.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Create a payment intent for checkout. Amount is converted to minor
/// units on the wire; the order id travels in metadata so the webhook
/// can find its way back.
pub async fn create_payment_intent(
    client: &reqwest::Client,
    secret_key: &str,
    amount: Decimal,
    currency: &str,
    order_id: Uuid,
    customer_email: Option<&str>,
) -> Result<CreatedIntent, String> {
    let minor_units = (amount * Decimal::new(100, 0))
        .round()
        .to_i64()
        .ok_or_else(|| "amount out of range".to_string())?;

    let mut form: Vec<(String, String)> = vec![
        ("amount".to_string(), minor_units.to_string()),
        ("currency".to_string(), currency.to_lowercase()),
        ("payment_method_types[]".to_string(), "card".to_string()),
        ("metadata[order_id]".to_string(), order_id.to_string()),
    ];
    if let Some(email) = customer_email {
        form.push(("receipt_email".to_string(), email.to_string()));
    }

    let res = client
        .post("https://api.stripe.com/v1/payment_intents")
        .bearer_auth(secret_key)
        .form(&form)
        .send()
        .await
        .map_err(|e| format!("Stripe error: {e}"))?;

    if !res.status().is_success() {
        let detail = res.text().await.unwrap_or_default();
        return Err(format!("Stripe intent creation failed: {detail}"));
    }

    let body: Value = res
        .json()
        .await
        .map_err(|e| format!("invalid Stripe response: {e}"))?;
    let intent_id = body
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Stripe response missing intent id".to_string())?;
    let client_secret = body
        .get("client_secret")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Stripe response missing client secret".to_string())?;

    Ok(CreatedIntent {
        intent_id: intent_id.to_string(),
        client_secret: client_secret.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DeliveryType, NewOrder, NewPayment};
    use serde_json::json;
    use storage::MemoryStorage;

    async fn order_with_payment(storage: &MemoryStorage) -> (Uuid, Uuid) {
        let bundle = storage
            .create_order_with_transaction(
                NewOrder {
                    tenant_id: Uuid::new_v4(),
                    customer_id: None,
                    customer_name: "Tiago".into(),
                    customer_phone: "+5511911112222".into(),
                    customer_email: None,
                    delivery_address: Some("Rua Um, 1".into()),
                    address_latitude: None,
                    address_longitude: None,
                    order_notes: None,
                    status: OrderStatus::Pending,
                    subtotal: "45.90".parse().unwrap(),
                    delivery_fee: Decimal::ZERO,
                    total: "45.90".parse().unwrap(),
                    delivery_type: DeliveryType::Delivery,
                    payment_method: "card".into(),
                    external_platform: None,
                    external_order_id: None,
                },
                vec![],
                Some(NewPayment {
                    provider_intent_id: None,
                    amount: "45.90".parse().unwrap(),
                    status: PaymentStatus::Pending,
                    payment_method: Some("card".into()),
                }),
                None,
            )
            .await
            .unwrap();
        (bundle.order.id, bundle.payment.unwrap().id)
    }

    fn stripe_event(event_type: &str, order_id: Uuid) -> Value {
        json!({
            "type": event_type,
            "data": { "object": {
                "id": "pi_3XYZ",
                "amount": 4590,
                "metadata": { "order_id": order_id.to_string() }
            } }
        })
    }

    #[tokio::test]
    async fn succeeded_intent_confirms_order_and_completes_payment_together() {
        let storage = MemoryStorage::new();
        let (order_id, _payment_id) = order_with_payment(&storage).await;

        let outcome =
            apply_stripe_event(&storage, &stripe_event("payment_intent.succeeded", order_id)).await;
        assert_eq!(
            outcome,
            StripeEventOutcome::Applied {
                order_id,
                payment_status: PaymentStatus::Completed,
                order_status: OrderStatus::Confirmed,
            }
        );

        let payment = storage.get_payment_by_order(order_id).await.unwrap().unwrap();
        let order = storage.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.provider_intent_id.as_deref(), Some("pi_3XYZ"));
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn failed_intent_cancels_the_order() {
        let storage = MemoryStorage::new();
        let (order_id, _) = order_with_payment(&storage).await;

        let outcome = apply_stripe_event(
            &storage,
            &stripe_event("payment_intent.payment_failed", order_id),
        )
        .await;
        assert!(matches!(outcome, StripeEventOutcome::Applied { .. }));

        let payment = storage.get_payment_by_order(order_id).await.unwrap().unwrap();
        let order = storage.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn unrelated_events_are_acknowledged_and_ignored() {
        let storage = MemoryStorage::new();
        let outcome = apply_stripe_event(
            &storage,
            &json!({ "type": "charge.refunded", "data": { "object": {} } }),
        )
        .await;
        assert_eq!(
            outcome,
            StripeEventOutcome::Ignored {
                event_type: "charge.refunded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_order_is_reported_not_applied() {
        let storage = MemoryStorage::new();
        let outcome = apply_stripe_event(
            &storage,
            &stripe_event("payment_intent.succeeded", Uuid::new_v4()),
        )
        .await;
        assert!(matches!(outcome, StripeEventOutcome::OrderUnknown { .. }));
    }

    #[test]
    fn stripe_signature_scheme_verifies() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let secret = "whsec_abc";
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let timestamp = "1717171717";
        let payload = format!("{timestamp}.{}", String::from_utf8_lossy(body));
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        let header = format!("t={timestamp},v1={sig}");
        assert!(verify_stripe_signature(&header, secret, body));
        assert!(!verify_stripe_signature(&header, "whsec_other", body));
        assert!(!verify_stripe_signature("t=123", secret, body));
        assert!(!verify_stripe_signature(&format!("t={timestamp},v1=bad"), secret, body));
    }
}
