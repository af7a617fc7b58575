//! Platform-agnostic webhook ingestion: verify the signature, look the
//! order up by its external reference, create it atomically or apply a
//! status-only update, then notify the customer. Never panics or
//! errors across the HTTP boundary; every path reports a typed
//! outcome the route layer can translate into a status code.

use serde_json::Value;
use uuid::Uuid;

use domain::{ExternalPlatform, NewCommission, OrderStatus};
use storage::{Storage, StorageError};

use crate::connectors;
use crate::notify::{KitchenOrderSummary, Notifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First delivery for this external reference; a full order record
    /// (items and commission snapshot included) was created.
    Created { order_id: Uuid },
    /// Known external reference; only the status moved.
    StatusUpdated { order_id: Uuid, status: OrderStatus },
    /// Known external reference and no valid transition (replay or
    /// out-of-order event). Nothing written.
    Unchanged { order_id: Uuid },
    UnknownEvent { event: String },
    InvalidSignature,
    InvalidPayload { message: String },
    Failed { message: String },
}

impl WebhookOutcome {
    pub fn success(&self) -> bool {
        matches!(
            self,
            WebhookOutcome::Created { .. }
                | WebhookOutcome::StatusUpdated { .. }
                | WebhookOutcome::Unchanged { .. }
        )
    }

    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            WebhookOutcome::Created { order_id }
            | WebhookOutcome::StatusUpdated { order_id, .. }
            | WebhookOutcome::Unchanged { order_id } => Some(*order_id),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            WebhookOutcome::Created { .. } => "order created".to_string(),
            WebhookOutcome::StatusUpdated { status, .. } => {
                format!("order status updated to {status}")
            }
            WebhookOutcome::Unchanged { .. } => "order already ingested".to_string(),
            WebhookOutcome::UnknownEvent { event } => format!("unknown event: {event}"),
            WebhookOutcome::InvalidSignature => "invalid signature".to_string(),
            WebhookOutcome::InvalidPayload { message } => message.clone(),
            WebhookOutcome::Failed { message } => message.clone(),
        }
    }
}

pub async fn process_platform_webhook(
    storage: &dyn Storage,
    notifier: &dyn Notifier,
    platform: ExternalPlatform,
    tenant_id: Uuid,
    body: &[u8],
    signature: Option<&str>,
    secret: Option<&str>,
) -> WebhookOutcome {
    // Signature first; no state is touched on a mismatch. A platform
    // with no configured secret skips verification.
    if let Some(secret) = secret {
        let valid = signature
            .map(|sig| connectors::verify_signature_hex(secret, body, sig))
            .unwrap_or(false);
        if !valid {
            tracing::warn!(platform = %platform, %tenant_id, "webhook rejected: invalid signature");
            return WebhookOutcome::InvalidSignature;
        }
    }

    let payload: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            return WebhookOutcome::InvalidPayload {
                message: format!("invalid JSON payload: {err}"),
            }
        }
    };

    let event = connectors::extract_event(platform, &payload);
    let Some(mapping) = connectors::map_external_event(&event) else {
        tracing::info!(platform = %platform, event, "ignoring unrecognized webhook event");
        return WebhookOutcome::UnknownEvent { event };
    };

    let normalized = match connectors::normalize_for(platform, &payload) {
        Ok(normalized) => normalized,
        Err(message) => {
            return WebhookOutcome::InvalidPayload {
                message: format!("failed to normalize order payload: {message}"),
            }
        }
    };
    let external_order_id = normalized.external_order_id.clone();

    let tenant = match storage.get_tenant(tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            return WebhookOutcome::Failed {
                message: "unknown tenant".to_string(),
            }
        }
        Err(err) => {
            return WebhookOutcome::Failed {
                message: err.to_string(),
            }
        }
    };

    let existing = match storage
        .get_order_by_external_reference(tenant_id, platform, &external_order_id)
        .await
    {
        Ok(existing) => existing,
        Err(err) => {
            return WebhookOutcome::Failed {
                message: err.to_string(),
            }
        }
    };

    let (order, previous_status, outcome) = match existing {
        Some(order) if order.status.can_transition_to(mapping.status) => {
            let previous = order.status;
            match storage.update_order_status(order.id, mapping.status).await {
                Ok(updated) => {
                    let outcome = WebhookOutcome::StatusUpdated {
                        order_id: updated.id,
                        status: updated.status,
                    };
                    (updated, Some(previous), outcome)
                }
                Err(err) => {
                    return WebhookOutcome::Failed {
                        message: err.to_string(),
                    }
                }
            }
        }
        Some(order) => {
            let outcome = WebhookOutcome::Unchanged { order_id: order.id };
            return outcome_after_noop(order.id, outcome);
        }
        None => {
            let (new_order, items) = normalized.into_order_records(tenant_id, mapping.status);
            let commission = NewCommission::snapshot(
                tenant_id,
                new_order.total,
                tenant.commission_percentage,
            );
            match storage
                .create_order_with_transaction(new_order, items, None, Some(commission))
                .await
            {
                Ok(bundle) => {
                    // The kitchen hears about every new platform order;
                    // a failed message never affects the write.
                    if let Some(restaurant_phone) = tenant.phone.as_deref() {
                        let summary = KitchenOrderSummary {
                            order_id: bundle.order.id,
                            items: bundle
                                .items
                                .iter()
                                .map(|i| (i.name.clone(), i.quantity))
                                .collect(),
                            total: bundle.order.total,
                            customer_phone: bundle.order.customer_phone.clone(),
                            delivery_address: bundle.order.delivery_address.clone(),
                        };
                        let result = notifier
                            .send_kitchen_order_notification(restaurant_phone, &summary)
                            .await;
                        if !result.success {
                            tracing::warn!(order_id = %bundle.order.id, "kitchen notification failed");
                        }
                    }
                    let outcome = WebhookOutcome::Created {
                        order_id: bundle.order.id,
                    };
                    (bundle.order, None, outcome)
                }
                Err(StorageError::Conflict(_)) => {
                    // A concurrent delivery for the same reference won
                    // the race; the unique key is the real guard, the
                    // lookup above was only an optimization.
                    return match storage
                        .get_order_by_external_reference(tenant_id, platform, &external_order_id)
                        .await
                    {
                        Ok(Some(order)) => WebhookOutcome::Unchanged { order_id: order.id },
                        _ => WebhookOutcome::Failed {
                            message: "duplicate external order id".to_string(),
                        },
                    };
                }
                Err(err) => {
                    return WebhookOutcome::Failed {
                        message: err.to_string(),
                    }
                }
            }
        }
    };

    // Notification failures are logged and never roll back the order
    // write. Cancellations notify nobody.
    if mapping.notify_customer && !order.customer_phone.is_empty() {
        let result = notifier
            .send_order_status_notification(
                &order.customer_phone,
                order.id,
                previous_status,
                mapping.status,
                &tenant.name,
            )
            .await;
        if !result.success {
            tracing::warn!(
                order_id = %order.id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "customer notification failed"
            );
        }
    }

    outcome
}

fn outcome_after_noop(order_id: Uuid, outcome: WebhookOutcome) -> WebhookOutcome {
    tracing::debug!(%order_id, "webhook replay ignored, no valid transition");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{NewTenant, OrderStatus};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Mutex;
    use storage::MemoryStorage;

    use crate::notify::{KitchenOrderSummary, NotifyResult};

    #[derive(Default)]
    struct SpyNotifier {
        status_calls: Mutex<Vec<(Uuid, OrderStatus)>>,
    }

    #[async_trait]
    impl Notifier for SpyNotifier {
        async fn send_order_status_notification(
            &self,
            _phone: &str,
            order_id: Uuid,
            _previous: Option<OrderStatus>,
            new_status: OrderStatus,
            _tenant_name: &str,
        ) -> NotifyResult {
            self.status_calls
                .lock()
                .unwrap()
                .push((order_id, new_status));
            NotifyResult::ok()
        }

        async fn send_kitchen_order_notification(
            &self,
            _restaurant_phone: &str,
            _summary: &KitchenOrderSummary,
        ) -> NotifyResult {
            NotifyResult::ok()
        }
    }

    async fn tenant(storage: &MemoryStorage) -> Uuid {
        storage
            .create_tenant(NewTenant {
                name: "Pizzaria Bela Vista".into(),
                slug: "bela-vista".into(),
                phone: Some("+5511933332222".into()),
                address: None,
                commission_percentage: "10.00".parse().unwrap(),
                delivery_fee_business: Decimal::ZERO,
                delivery_fee_customer: "5.00".parse().unwrap(),
                operating_hours: None,
            })
            .await
            .unwrap()
            .id
    }

    fn ifood_body(event: &str) -> Vec<u8> {
        json!({
            "event": event,
            "orderId": "abc-1",
            "order": {
                "id": "abc-1",
                "reference": "IF-4410",
                "customer": { "name": "Carla Nunes", "phone": "11988887777" },
                "items": [
                    { "name": "Pizza Quatro Queijos", "quantity": 1, "price": 39.90 },
                    { "name": "Guarana Lata", "quantity": 2, "price": 3.00 }
                ],
                "totalAmount": 45.90
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn ifood_order_is_created_then_replay_is_idempotent() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;
        let body = ifood_body("order.placed");

        let first = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &body,
            None,
            None,
        )
        .await;
        let order_id = match first {
            WebhookOutcome::Created { order_id } => order_id,
            other => panic!("expected Created, got {other:?}"),
        };

        let order = storage.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.total, "45.90".parse::<Decimal>().unwrap());
        assert_eq!(order.customer_email, None);
        assert_eq!(order.external_platform, Some(ExternalPlatform::Ifood));
        assert_eq!(order.external_order_id.as_deref(), Some("IF-4410"));
        assert_eq!(storage.list_order_items(order_id).await.unwrap().len(), 2);

        // Commission snapshotted at the tenant's current 10% rate.
        let commissions = storage.list_commissions_by_tenant(tenant_id).await.unwrap();
        assert_eq!(commissions.len(), 1);
        assert_eq!(
            commissions[0].commission_amount,
            "4.59".parse::<Decimal>().unwrap()
        );

        // Identical replay: exactly one order row remains.
        let replay = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &body,
            None,
            None,
        )
        .await;
        assert_eq!(replay, WebhookOutcome::Unchanged { order_id });
        assert_eq!(storage.list_orders_by_tenant(tenant_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_event_updates_status_only() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;

        process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &ifood_body("order.placed"),
            None,
            None,
        )
        .await;
        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &ifood_body("order.dispatched"),
            None,
            None,
        )
        .await;

        let order_id = outcome.order_id().unwrap();
        assert!(matches!(outcome, WebhookOutcome::StatusUpdated { .. }));
        let order = storage.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
        assert_eq!(storage.list_orders_by_tenant(tenant_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_never_notifies_the_customer() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;

        process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &ifood_body("order.placed"),
            None,
            None,
        )
        .await;
        let notifications_before = notifier.status_calls.lock().unwrap().len();
        assert_eq!(notifications_before, 1);

        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &ifood_body("order.cancelled"),
            None,
            None,
        )
        .await;
        assert!(matches!(outcome, WebhookOutcome::StatusUpdated { .. }));
        assert_eq!(notifier.status_calls.lock().unwrap().len(), notifications_before);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_with_no_side_effects() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;
        let body = ifood_body("order.placed");

        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &body,
            Some("deadbeef"),
            Some("secret"),
        )
        .await;
        assert_eq!(outcome, WebhookOutcome::InvalidSignature);
        assert!(storage.list_orders_by_tenant(tenant_id).await.unwrap().is_empty());

        // Missing header counts as invalid too.
        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &body,
            None,
            Some("secret"),
        )
        .await;
        assert_eq!(outcome, WebhookOutcome::InvalidSignature);
    }

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;
        let body = ifood_body("order.placed");

        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(&body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &body,
            Some(&sig),
            Some("secret"),
        )
        .await;
        assert!(matches!(outcome, WebhookOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn unknown_event_is_a_typed_outcome() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let tenant_id = tenant(&storage).await;

        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::Ifood,
            tenant_id,
            &ifood_body("order.refund_requested"),
            None,
            None,
        )
        .await;
        assert_eq!(
            outcome,
            WebhookOutcome::UnknownEvent {
                event: "order.refund_requested".to_string()
            }
        );
        assert!(storage.list_orders_by_tenant(tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tenant_fails_without_creating_anything() {
        let storage = MemoryStorage::new();
        let notifier = SpyNotifier::default();
        let outcome = process_platform_webhook(
            &storage,
            &notifier,
            ExternalPlatform::QueroDelivery,
            Uuid::new_v4(),
            &json!({ "event": "order.created", "order": { "id": "QD-1", "total": 10.0 } })
                .to_string()
                .into_bytes(),
            None,
            None,
        )
        .await;
        assert!(matches!(outcome, WebhookOutcome::Failed { .. }));
    }
}
