use std::sync::Arc;

use domain::ExternalPlatform;
use storage::SmartStorage;

use crate::dispatch::{DeliveryOptimizer, DriverLocationRegistry};
use crate::notify::Notifier;

/// Per-platform webhook secrets, read once at startup. An absent
/// secret disables signature verification for that platform.
pub struct WebhookSecrets {
    pub stripe: Option<String>,
    pub ifood: Option<String>,
    pub ubereats: Option<String>,
    pub quero: Option<String>,
    pub generic: Option<String>,
}

impl WebhookSecrets {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            stripe: read("STRIPE_WEBHOOK_SECRET"),
            ifood: read("IFOOD_WEBHOOK_SECRET"),
            ubereats: read("UBEREATS_WEBHOOK_SECRET"),
            quero: read("QUERO_WEBHOOK_SECRET"),
            generic: read("GENERIC_WEBHOOK_SECRET"),
        }
    }

    pub fn for_platform(&self, platform: ExternalPlatform) -> Option<&str> {
        match platform {
            ExternalPlatform::Ifood => self.ifood.as_deref(),
            ExternalPlatform::UberEats => self.ubereats.as_deref(),
            ExternalPlatform::QueroDelivery => self.quero.as_deref(),
            ExternalPlatform::Generic => self.generic.as_deref(),
        }
    }
}

/// Shared app state for Axum handlers. Storage is always usable: the
/// facade serves from memory when the database is unreachable.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SmartStorage>,
    pub optimizer: Arc<DeliveryOptimizer>,
    pub locations: Arc<DriverLocationRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub secrets: Arc<WebhookSecrets>,
    pub http: reqwest::Client,
}
