//! Order repository. One trait, two backends: `DatabaseStorage` is the
//! durable MySQL implementation, `MemoryStorage` the in-process
//! degraded-mode fallback, and `SmartStorage` the facade that fails
//! over from the first to the second on connectivity errors.

mod database;
mod error;
mod memory;
mod smart;

use std::path::Path;

use async_trait::async_trait;
use sqlx::{migrate::Migrator, MySqlPool, Pool};
use uuid::Uuid;

use domain::{
    AssignmentStatus, Category, Commission, CustomerProfile, DriverAssignment, DriverProfile,
    DriverStatus, ExternalPlatform, NewCategory, NewCommission, NewCustomerProfile,
    NewDriverAssignment, NewDriverProfile, NewOrder, NewOrderItem, NewPayment, NewPizzaFlavor,
    NewProduct, NewPromotion, NewRating, NewTenant, NewUser, Order, OrderItem, OrderStatus,
    Payment, PaymentStatus, PizzaFlavor, Product, ProductUpdate, Promotion, Rating, Role, Tenant,
    TenantUpdate, User,
};

pub use database::DatabaseStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
pub use smart::SmartStorage;

pub type DbPool = MySqlPool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    Pool::connect(database_url).await
}

/// Run migrations from the workspace `migrations/` directory.
/// Call this after connect when the app starts (optional; can also use
/// `sqlx migrate run` from the CLI).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    // migrations/ is at workspace root: crates/storage -> ../../migrations
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into());
    let migrations_path = Path::new(&manifest_dir).join("../../migrations");
    let migrator = Migrator::new(migrations_path).await?;
    migrator.run(pool).await?;
    Ok(())
}

/// Everything written by `create_order_with_transaction`.
#[derive(Debug, Clone)]
pub struct OrderBundle {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
    pub commission: Option<Commission>,
}

/// Full repository contract. Every method exists on both backends; the
/// facade decides which one serves a given call.
#[async_trait]
pub trait Storage: Send + Sync {
    // Tenants
    async fn create_tenant(&self, tenant: NewTenant) -> Result<Tenant, StorageError>;
    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StorageError>;
    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError>;
    async fn list_active_tenants(&self) -> Result<Vec<Tenant>, StorageError>;
    async fn update_tenant(&self, id: Uuid, data: TenantUpdate) -> Result<Tenant, StorageError>;

    // Users
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;
    async fn list_users_by_role(&self, role: Role) -> Result<Vec<User>, StorageError>;
    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError>;

    // Customer profiles
    async fn create_customer_profile(
        &self,
        profile: NewCustomerProfile,
    ) -> Result<CustomerProfile, StorageError>;
    async fn get_customer_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CustomerProfile>, StorageError>;

    // Driver profiles
    async fn create_driver_profile(
        &self,
        profile: NewDriverProfile,
    ) -> Result<DriverProfile, StorageError>;
    async fn get_driver_profile(&self, user_id: Uuid)
        -> Result<Option<DriverProfile>, StorageError>;
    async fn list_available_drivers(&self) -> Result<Vec<DriverProfile>, StorageError>;
    async fn update_driver_status(
        &self,
        user_id: Uuid,
        status: DriverStatus,
    ) -> Result<DriverProfile, StorageError>;
    async fn update_driver_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<DriverProfile, StorageError>;

    // Categories
    async fn create_category(&self, category: NewCategory) -> Result<Category, StorageError>;
    async fn list_categories_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Category>, StorageError>;
    async fn delete_category(&self, id: Uuid) -> Result<(), StorageError>;

    // Products
    async fn create_product(&self, product: NewProduct) -> Result<Product, StorageError>;
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StorageError>;
    async fn list_products_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Product>, StorageError>;
    async fn list_products_by_category(
        &self,
        category_id: Uuid,
    ) -> Result<Vec<Product>, StorageError>;
    async fn update_product(&self, id: Uuid, data: ProductUpdate) -> Result<Product, StorageError>;
    async fn delete_product(&self, id: Uuid) -> Result<(), StorageError>;

    // Pizza flavors
    async fn create_pizza_flavor(&self, flavor: NewPizzaFlavor)
        -> Result<PizzaFlavor, StorageError>;
    async fn list_pizza_flavors_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<PizzaFlavor>, StorageError>;
    async fn link_product_flavor(&self, product_id: Uuid, flavor_id: Uuid)
        -> Result<(), StorageError>;
    async fn list_product_flavors(&self, product_id: Uuid)
        -> Result<Vec<PizzaFlavor>, StorageError>;

    // Orders
    async fn create_order(&self, order: NewOrder) -> Result<Order, StorageError>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StorageError>;
    /// Lookup by the webhook de-duplication key.
    async fn get_order_by_external_reference(
        &self,
        tenant_id: Uuid,
        platform: ExternalPlatform,
        external_order_id: &str,
    ) -> Result<Option<Order>, StorageError>;
    async fn list_orders_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Order>, StorageError>;
    async fn list_orders_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StorageError>;
    async fn list_orders_by_driver(&self, driver_id: Uuid) -> Result<Vec<Order>, StorageError>;
    async fn list_pending_orders_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Order>, StorageError>;
    async fn update_order_status(&self, id: Uuid, status: OrderStatus)
        -> Result<Order, StorageError>;
    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, StorageError>;

    /// The one multi-entity write in the system. Write order is fixed
    /// (order, items, payment, commission) because later rows reference
    /// the order's generated id. All rows persist or none do.
    async fn create_order_with_transaction(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
        payment: Option<NewPayment>,
        commission: Option<NewCommission>,
    ) -> Result<OrderBundle, StorageError>;

    // Order items
    async fn create_order_item(
        &self,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<OrderItem, StorageError>;
    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StorageError>;

    // Payments
    async fn create_payment(
        &self,
        order_id: Uuid,
        payment: NewPayment,
    ) -> Result<Payment, StorageError>;
    async fn get_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StorageError>;
    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Payment, StorageError>;
    async fn set_payment_intent_id(&self, id: Uuid, intent_id: &str)
        -> Result<Payment, StorageError>;

    /// Couples the payment and order transitions in one logical
    /// operation: completed payments confirm the order, failed payments
    /// cancel it. Atomic on both backends.
    async fn update_payment_and_order_status(
        &self,
        payment_id: Uuid,
        payment_status: PaymentStatus,
        order_id: Uuid,
        order_status: OrderStatus,
    ) -> Result<(Payment, Order), StorageError>;

    // Commissions
    async fn create_commission(
        &self,
        order_id: Uuid,
        commission: NewCommission,
    ) -> Result<Commission, StorageError>;
    async fn list_commissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Commission>, StorageError>;
    async fn list_unpaid_commissions(&self) -> Result<Vec<Commission>, StorageError>;
    async fn mark_commission_paid(&self, id: Uuid) -> Result<Commission, StorageError>;

    // Driver assignments
    async fn create_driver_assignment(
        &self,
        assignment: NewDriverAssignment,
    ) -> Result<DriverAssignment, StorageError>;
    async fn list_assignments_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError>;
    async fn list_pending_assignments_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError>;
    async fn respond_to_assignment(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<DriverAssignment, StorageError>;

    // Ratings
    async fn create_rating(&self, rating: NewRating) -> Result<Rating, StorageError>;
    async fn list_ratings_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Rating>, StorageError>;

    // Promotions
    async fn create_promotion(&self, promotion: NewPromotion) -> Result<Promotion, StorageError>;
    async fn list_active_promotions(&self, tenant_id: Uuid) -> Result<Vec<Promotion>, StorageError>;
}
