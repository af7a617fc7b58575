//! Failover facade. Tries the durable backend first; the first
//! connectivity-class failure latches the process into degraded mode
//! and every call from then on is served by the in-memory fallback.
//! The latch is one-way: there is no recovery probe, only a restart
//! brings the durable backend back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{DatabaseStorage, DbPool, MemoryStorage, OrderBundle, Storage, StorageError};
use domain::{
    AssignmentStatus, Category, Commission, CustomerProfile, DriverAssignment, DriverProfile,
    DriverStatus, ExternalPlatform, NewCategory, NewCommission, NewCustomerProfile,
    NewDriverAssignment, NewDriverProfile, NewOrder, NewOrderItem, NewPayment, NewPizzaFlavor,
    NewProduct, NewPromotion, NewRating, NewTenant, NewUser, Order, OrderItem, OrderStatus,
    Payment, PaymentStatus, PizzaFlavor, Product, ProductUpdate, Promotion, Rating, Role, Tenant,
    TenantUpdate, User,
};

pub struct SmartStorage {
    primary: Option<Arc<dyn Storage>>,
    fallback: Arc<dyn Storage>,
    degraded: AtomicBool,
}

impl SmartStorage {
    /// `primary` is `None` when no durable backend was configured at
    /// all; the facade then starts (and stays) in degraded mode.
    pub fn new(primary: Option<Arc<dyn Storage>>, fallback: Arc<dyn Storage>) -> Self {
        let degraded = primary.is_none();
        if degraded {
            tracing::warn!("no durable backend configured, serving from memory storage");
        }
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(degraded),
        }
    }

    pub fn with_database(pool: DbPool) -> Self {
        Self::new(
            Some(Arc::new(DatabaseStorage::new(pool))),
            Arc::new(MemoryStorage::new()),
        )
    }

    pub fn memory_only() -> Self {
        Self::new(None, Arc::new(MemoryStorage::new()))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn active_primary(&self) -> Option<&Arc<dyn Storage>> {
        if self.is_degraded() {
            None
        } else {
            self.primary.as_ref()
        }
    }

    /// One-way transition; the warning is logged exactly once per
    /// process no matter how many calls race on the flag.
    fn trip(&self, operation: &'static str, err: &StorageError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                operation,
                error = %err,
                "durable storage unreachable, failing over to memory storage for the rest of the process lifetime"
            );
        }
    }
}

/// Invokes a callback macro with every `Storage` method signature, so
/// the facade (and test doubles) can generate uniform forwarding
/// without hand-writing each method.
macro_rules! for_each_storage_method {
    ($cb:ident) => {
        $cb! {
            fn create_tenant(tenant: NewTenant) -> Tenant;
            fn get_tenant(id: Uuid) -> Option<Tenant>;
            fn get_tenant_by_slug(slug: &str) -> Option<Tenant>;
            fn list_active_tenants() -> Vec<Tenant>;
            fn update_tenant(id: Uuid, data: TenantUpdate) -> Tenant;
            fn create_user(user: NewUser) -> User;
            fn get_user(id: Uuid) -> Option<User>;
            fn get_user_by_email(email: &str) -> Option<User>;
            fn list_users_by_role(role: Role) -> Vec<User>;
            fn list_users_by_tenant(tenant_id: Uuid) -> Vec<User>;
            fn create_customer_profile(profile: NewCustomerProfile) -> CustomerProfile;
            fn get_customer_profile(user_id: Uuid) -> Option<CustomerProfile>;
            fn create_driver_profile(profile: NewDriverProfile) -> DriverProfile;
            fn get_driver_profile(user_id: Uuid) -> Option<DriverProfile>;
            fn list_available_drivers() -> Vec<DriverProfile>;
            fn update_driver_status(user_id: Uuid, status: DriverStatus) -> DriverProfile;
            fn update_driver_location(user_id: Uuid, latitude: f64, longitude: f64) -> DriverProfile;
            fn create_category(category: NewCategory) -> Category;
            fn list_categories_by_tenant(tenant_id: Uuid) -> Vec<Category>;
            fn delete_category(id: Uuid) -> ();
            fn create_product(product: NewProduct) -> Product;
            fn get_product(id: Uuid) -> Option<Product>;
            fn list_products_by_tenant(tenant_id: Uuid) -> Vec<Product>;
            fn list_products_by_category(category_id: Uuid) -> Vec<Product>;
            fn update_product(id: Uuid, data: ProductUpdate) -> Product;
            fn delete_product(id: Uuid) -> ();
            fn create_pizza_flavor(flavor: NewPizzaFlavor) -> PizzaFlavor;
            fn list_pizza_flavors_by_tenant(tenant_id: Uuid) -> Vec<PizzaFlavor>;
            fn link_product_flavor(product_id: Uuid, flavor_id: Uuid) -> ();
            fn list_product_flavors(product_id: Uuid) -> Vec<PizzaFlavor>;
            fn create_order(order: NewOrder) -> Order;
            fn get_order(id: Uuid) -> Option<Order>;
            fn get_order_by_external_reference(tenant_id: Uuid, platform: ExternalPlatform, external_order_id: &str) -> Option<Order>;
            fn list_orders_by_tenant(tenant_id: Uuid) -> Vec<Order>;
            fn list_orders_by_customer(customer_id: Uuid) -> Vec<Order>;
            fn list_orders_by_driver(driver_id: Uuid) -> Vec<Order>;
            fn list_pending_orders_by_tenant(tenant_id: Uuid) -> Vec<Order>;
            fn update_order_status(id: Uuid, status: OrderStatus) -> Order;
            fn assign_driver(order_id: Uuid, driver_id: Uuid) -> Order;
            fn create_order_with_transaction(order: NewOrder, items: Vec<NewOrderItem>, payment: Option<NewPayment>, commission: Option<NewCommission>) -> OrderBundle;
            fn create_order_item(order_id: Uuid, item: NewOrderItem) -> OrderItem;
            fn list_order_items(order_id: Uuid) -> Vec<OrderItem>;
            fn create_payment(order_id: Uuid, payment: NewPayment) -> Payment;
            fn get_payment_by_order(order_id: Uuid) -> Option<Payment>;
            fn update_payment_status(id: Uuid, status: PaymentStatus) -> Payment;
            fn set_payment_intent_id(id: Uuid, intent_id: &str) -> Payment;
            fn update_payment_and_order_status(payment_id: Uuid, payment_status: PaymentStatus, order_id: Uuid, order_status: OrderStatus) -> (Payment, Order);
            fn create_commission(order_id: Uuid, commission: NewCommission) -> Commission;
            fn list_commissions_by_tenant(tenant_id: Uuid) -> Vec<Commission>;
            fn list_unpaid_commissions() -> Vec<Commission>;
            fn mark_commission_paid(id: Uuid) -> Commission;
            fn create_driver_assignment(assignment: NewDriverAssignment) -> DriverAssignment;
            fn list_assignments_by_order(order_id: Uuid) -> Vec<DriverAssignment>;
            fn list_pending_assignments_by_driver(driver_id: Uuid) -> Vec<DriverAssignment>;
            fn respond_to_assignment(id: Uuid, status: AssignmentStatus) -> DriverAssignment;
            fn create_rating(rating: NewRating) -> Rating;
            fn list_ratings_by_tenant(tenant_id: Uuid) -> Vec<Rating>;
            fn create_promotion(promotion: NewPromotion) -> Promotion;
            fn list_active_promotions(tenant_id: Uuid) -> Vec<Promotion>;
        }
    };
}

macro_rules! smart_failover_impl {
    ($( fn $method:ident ( $($arg:ident : $ty:ty),* ) -> $ret:ty; )*) => {
        #[async_trait]
        impl Storage for SmartStorage {
            $(
                async fn $method(&self, $($arg: $ty),*) -> Result<$ret, StorageError> {
                    if let Some(primary) = self.active_primary() {
                        match primary.$method($($arg.clone()),*).await {
                            Err(err) if err.is_connectivity() => {
                                self.trip(stringify!($method), &err);
                                self.fallback.$method($($arg),*).await
                            }
                            other => other,
                        }
                    } else {
                        self.fallback.$method($($arg),*).await
                    }
                }
            )*
        }
    };
}

for_each_storage_method!(smart_failover_impl);

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DeliveryType;
    use rust_decimal::Decimal;

    /// Wraps a real memory store behind a health switch; while
    /// unhealthy every call fails with a connectivity error, like a
    /// database whose host stopped resolving.
    struct FlakyStorage {
        inner: MemoryStorage,
        healthy: AtomicBool,
    }

    impl FlakyStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::Relaxed);
        }

        fn gate(&self) -> Result<(), StorageError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(StorageError::Connectivity("connection refused".into()))
            }
        }
    }

    macro_rules! flaky_impl {
        ($( fn $method:ident ( $($arg:ident : $ty:ty),* ) -> $ret:ty; )*) => {
            #[async_trait]
            impl Storage for FlakyStorage {
                $(
                    async fn $method(&self, $($arg: $ty),*) -> Result<$ret, StorageError> {
                        self.gate()?;
                        self.inner.$method($($arg),*).await
                    }
                )*
            }
        };
    }

    for_each_storage_method!(flaky_impl);

    fn tenant_fixture(slug: &str) -> NewTenant {
        NewTenant {
            name: "Cantina da Praca".into(),
            slug: slug.into(),
            phone: None,
            address: None,
            commission_percentage: "10.00".parse().unwrap(),
            delivery_fee_business: Decimal::ZERO,
            delivery_fee_customer: "5.00".parse().unwrap(),
            operating_hours: None,
        }
    }

    fn order_fixture(tenant_id: Uuid) -> NewOrder {
        NewOrder {
            tenant_id,
            customer_id: None,
            customer_name: "Joana".into(),
            customer_phone: "+5511988887777".into(),
            customer_email: None,
            delivery_address: Some("Av. Paulista, 1000".into()),
            address_latitude: None,
            address_longitude: None,
            order_notes: None,
            status: OrderStatus::Pending,
            subtotal: "20.00".parse().unwrap(),
            delivery_fee: "5.00".parse().unwrap(),
            total: "25.00".parse().unwrap(),
            delivery_type: DeliveryType::Delivery,
            payment_method: "cash".into(),
            external_platform: None,
            external_order_id: None,
        }
    }

    #[tokio::test]
    async fn latch_is_one_way_even_after_primary_recovers() {
        let primary = Arc::new(FlakyStorage::new());
        let fallback = Arc::new(MemoryStorage::new());
        let smart = SmartStorage::new(Some(primary.clone()), fallback.clone());

        // Healthy: writes land on the primary.
        let tenant = smart.create_tenant(tenant_fixture("cantina")).await.unwrap();
        assert!(!smart.is_degraded());
        assert!(primary
            .inner
            .get_tenant(tenant.id)
            .await
            .unwrap()
            .is_some());

        // Outage: the call is served by the fallback and the latch trips.
        primary.set_healthy(false);
        let fallback_tenant = smart.create_tenant(tenant_fixture("outra")).await.unwrap();
        assert!(smart.is_degraded());
        assert!(fallback
            .get_tenant(fallback_tenant.id)
            .await
            .unwrap()
            .is_some());

        // Recovery does not matter: the process stays on the fallback.
        primary.set_healthy(true);
        let later = smart.create_order(order_fixture(tenant.id)).await.unwrap();
        assert!(smart.is_degraded());
        assert!(primary.inner.get_order(later.id).await.unwrap().is_none());
        assert!(fallback.get_order(later.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn data_errors_do_not_trip_the_latch() {
        let primary = Arc::new(FlakyStorage::new());
        let smart = SmartStorage::new(Some(primary.clone()), Arc::new(MemoryStorage::new()));

        let missing = smart
            .update_order_status(Uuid::new_v4(), OrderStatus::Confirmed)
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
        assert!(!smart.is_degraded());

        // Conflicts propagate untouched as well.
        smart.create_tenant(tenant_fixture("duplicada")).await.unwrap();
        let dup = smart.create_tenant(tenant_fixture("duplicada")).await;
        assert!(matches!(dup, Err(StorageError::Conflict(_))));
        assert!(!smart.is_degraded());
    }

    #[tokio::test]
    async fn memory_only_facade_starts_degraded() {
        let smart = SmartStorage::memory_only();
        assert!(smart.is_degraded());
        let tenant = smart.create_tenant(tenant_fixture("so-memoria")).await.unwrap();
        assert_eq!(
            smart
                .get_tenant_by_slug("so-memoria")
                .await
                .unwrap()
                .map(|t| t.id),
            Some(tenant.id)
        );
    }
}
