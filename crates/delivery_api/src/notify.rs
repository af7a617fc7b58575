//! Customer and kitchen notifications over WhatsApp via the Twilio
//! REST API. Unconfigured credentials degrade to a logged no-op so the
//! order write path never depends on messaging being available.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use domain::OrderStatus;

#[derive(Debug, Clone)]
pub struct NotifyResult {
    pub success: bool,
    pub error: Option<String>,
}

impl NotifyResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KitchenOrderSummary {
    pub order_id: Uuid,
    pub items: Vec<(String, i32)>,
    pub total: Decimal,
    pub customer_phone: String,
    pub delivery_address: Option<String>,
}

/// Notification dispatcher boundary. Implementations never return an
/// error across this boundary; failures are reported in the result and
/// the caller decides whether they matter.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_status_notification(
        &self,
        phone: &str,
        order_id: Uuid,
        previous: Option<OrderStatus>,
        new_status: OrderStatus,
        tenant_name: &str,
    ) -> NotifyResult;

    async fn send_kitchen_order_notification(
        &self,
        restaurant_phone: &str,
        summary: &KitchenOrderSummary,
    ) -> NotifyResult;
}

/// Customer-facing status line, matching the storefront's wording.
fn status_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "foi recebido",
        OrderStatus::Confirmed => "foi confirmado",
        OrderStatus::Preparing => "esta sendo preparado",
        OrderStatus::Ready => "esta pronto para entrega",
        OrderStatus::OutForDelivery => "saiu para entrega",
        OrderStatus::Delivered => "foi entregue",
        OrderStatus::Cancelled => "foi cancelado",
    }
}

/// Ensure +55-style E.164; bare local numbers are assumed Brazilian.
fn format_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else if trimmed.starts_with("55") {
        format!("+{trimmed}")
    } else {
        format!("+55{trimmed}")
    }
}

pub struct TwilioWhatsAppNotifier {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_phone: String,
}

impl TwilioWhatsAppNotifier {
    /// Returns `None` when credentials are not fully configured; the
    /// caller should fall back to [`NoopNotifier`].
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        let from_phone = std::env::var("TWILIO_WHATSAPP_PHONE_NUMBER").ok()?;
        if account_sid.is_empty() || auth_token.is_empty() || from_phone.is_empty() {
            return None;
        }
        Some(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            account_sid,
            auth_token,
            from_phone,
        })
    }

    async fn send(&self, to: &str, body: &str) -> NotifyResult {
        let to = format_phone(to);
        if to.len() < 11 {
            return NotifyResult::failed(format!("invalid phone number: {to}"));
        }
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let form = [
            ("From", format!("whatsapp:{}", self.from_phone)),
            ("To", format!("whatsapp:{to}")),
            ("Body", body.to_string()),
        ];
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await;
        match response {
            Ok(res) if res.status().is_success() => NotifyResult::ok(),
            Ok(res) => {
                let status = res.status();
                tracing::warn!(%status, "Twilio rejected WhatsApp message");
                NotifyResult::failed(format!("Twilio returned {status}"))
            }
            Err(err) => {
                tracing::warn!(error = %err, "WhatsApp send failed");
                NotifyResult::failed(err.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for TwilioWhatsAppNotifier {
    async fn send_order_status_notification(
        &self,
        phone: &str,
        order_id: Uuid,
        _previous: Option<OrderStatus>,
        new_status: OrderStatus,
        tenant_name: &str,
    ) -> NotifyResult {
        let short_id = &order_id.to_string()[..8];
        let body = format!(
            "{tenant_name}: seu pedido #{short_id} {}.",
            status_message(new_status)
        );
        self.send(phone, &body).await
    }

    async fn send_kitchen_order_notification(
        &self,
        restaurant_phone: &str,
        summary: &KitchenOrderSummary,
    ) -> NotifyResult {
        let mut body = format!(
            "Novo pedido #{}\n",
            &summary.order_id.to_string()[..8]
        );
        for (name, quantity) in &summary.items {
            body.push_str(&format!("{quantity}x {name}\n"));
        }
        body.push_str(&format!("Total: R$ {}\n", summary.total));
        if let Some(address) = &summary.delivery_address {
            body.push_str(&format!("Entrega: {address}\n"));
        }
        body.push_str(&format!("Cliente: {}", summary.customer_phone));
        self.send(restaurant_phone, &body).await
    }
}

/// Logging fallback used when Twilio credentials are absent.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_order_status_notification(
        &self,
        phone: &str,
        order_id: Uuid,
        _previous: Option<OrderStatus>,
        new_status: OrderStatus,
        tenant_name: &str,
    ) -> NotifyResult {
        tracing::info!(
            %order_id,
            phone,
            status = %new_status,
            tenant = tenant_name,
            "notification skipped (WhatsApp not configured)"
        );
        NotifyResult::ok()
    }

    async fn send_kitchen_order_notification(
        &self,
        restaurant_phone: &str,
        summary: &KitchenOrderSummary,
    ) -> NotifyResult {
        tracing::info!(
            order_id = %summary.order_id,
            restaurant_phone,
            "kitchen notification skipped (WhatsApp not configured)"
        );
        NotifyResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formatting_assumes_brazil() {
        assert_eq!(format_phone("+5511999990000"), "+5511999990000");
        assert_eq!(format_phone("5511999990000"), "+5511999990000");
        assert_eq!(format_phone("11999990000"), "+5511999990000");
    }
}
