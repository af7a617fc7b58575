//! Durable MySQL backend. Runtime queries with `?` binds; uuids are
//! bound as strings and timestamps as naive UTC. Inserts bind values
//! generated in Rust so the returned entity needs no re-select; updates
//! re-select through the matching getter.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::{DbPool, OrderBundle, Storage, StorageError};
use domain::{
    AssignmentStatus, Category, Commission, CustomerProfile, DriverAssignment, DriverProfile,
    DriverStatus, ExternalPlatform, NewCategory, NewCommission, NewCustomerProfile,
    NewDriverAssignment, NewDriverProfile, NewOrder, NewOrderItem, NewPayment, NewPizzaFlavor,
    NewProduct, NewPromotion, NewRating, NewTenant, NewUser, OperatingHours, Order, OrderItem,
    OrderStatus, Payment, PaymentStatus, PizzaFlavor, Product, ProductUpdate, Promotion, Rating,
    Role, Tenant, TenantUpdate, User,
};

pub struct DatabaseStorage {
    pool: DbPool,
}

impl DatabaseStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_id(s: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|_| StorageError::Invalid(format!("malformed id: {s}")))
}

fn parse_opt_id(s: Option<&str>) -> Result<Option<Uuid>, StorageError> {
    s.map(parse_id).transpose()
}

fn parse_enum<T>(s: &str) -> Result<T, StorageError>
where
    T: FromStr<Err = String>,
{
    s.parse().map_err(StorageError::Invalid)
}

fn utc(naive: NaiveDateTime) -> chrono::DateTime<Utc> {
    naive.and_utc()
}

fn validate_item(item: &NewOrderItem) -> Result<(), StorageError> {
    if item.quantity < 1 {
        return Err(StorageError::Invalid(format!(
            "order item '{}' has non-positive quantity {}",
            item.name, item.quantity
        )));
    }
    if item.price.is_sign_negative() {
        return Err(StorageError::Invalid(format!(
            "order item '{}' has negative price",
            item.name
        )));
    }
    Ok(())
}

#[derive(FromRow)]
struct TenantRow {
    id: String,
    name: String,
    slug: String,
    phone: Option<String>,
    address: Option<String>,
    is_active: bool,
    commission_percentage: Decimal,
    delivery_fee_business: Decimal,
    delivery_fee_customer: Decimal,
    operating_hours: serde_json::Value,
    created_at: NaiveDateTime,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StorageError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Tenant {
            id: parse_id(&row.id)?,
            name: row.name,
            slug: row.slug,
            phone: row.phone,
            address: row.address,
            is_active: row.is_active,
            commission_percentage: row.commission_percentage,
            delivery_fee_business: row.delivery_fee_business,
            delivery_fee_customer: row.delivery_fee_customer,
            operating_hours: serde_json::from_value::<OperatingHours>(row.operating_hours)
                .unwrap_or_default(),
            created_at: utc(row.created_at),
        })
    }
}

const TENANT_COLUMNS: &str = "id, name, slug, phone, address, is_active, commission_percentage, \
     delivery_fee_business, delivery_fee_customer, operating_hours, created_at";

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    name: String,
    phone: Option<String>,
    role: String,
    tenant_id: Option<String>,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_id(&row.id)?,
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            phone: row.phone,
            role: parse_enum::<Role>(&row.role)?,
            tenant_id: parse_opt_id(row.tenant_id.as_deref())?,
            is_active: row.is_active,
            created_at: utc(row.created_at),
        })
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, name, phone, role, tenant_id, is_active, created_at";

#[derive(FromRow)]
struct DriverProfileRow {
    id: String,
    user_id: String,
    vehicle_type: Option<String>,
    vehicle_plate: Option<String>,
    status: String,
    current_latitude: Option<f64>,
    current_longitude: Option<f64>,
    rating: Option<Decimal>,
    total_deliveries: i32,
}

impl TryFrom<DriverProfileRow> for DriverProfile {
    type Error = StorageError;

    fn try_from(row: DriverProfileRow) -> Result<Self, Self::Error> {
        Ok(DriverProfile {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            vehicle_type: row.vehicle_type,
            vehicle_plate: row.vehicle_plate,
            status: parse_enum::<DriverStatus>(&row.status)?,
            current_latitude: row.current_latitude,
            current_longitude: row.current_longitude,
            rating: row.rating,
            total_deliveries: row.total_deliveries,
        })
    }
}

const DRIVER_PROFILE_COLUMNS: &str = "id, user_id, vehicle_type, vehicle_plate, status, \
     current_latitude, current_longitude, rating, total_deliveries";

#[derive(FromRow)]
struct ProductRow {
    id: String,
    tenant_id: String,
    category_id: String,
    name: String,
    description: String,
    price: Decimal,
    is_available: bool,
    prices_by_size: Option<serde_json::Value>,
    is_combination: bool,
    max_flavors: i32,
    created_at: NaiveDateTime,
}

impl TryFrom<ProductRow> for Product {
    type Error = StorageError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: parse_id(&row.id)?,
            tenant_id: parse_id(&row.tenant_id)?,
            category_id: parse_id(&row.category_id)?,
            name: row.name,
            description: row.description,
            price: row.price,
            is_available: row.is_available,
            prices_by_size: row
                .prices_by_size
                .and_then(|v| serde_json::from_value(v).ok()),
            is_combination: row.is_combination,
            max_flavors: row.max_flavors,
            created_at: utc(row.created_at),
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, tenant_id, category_id, name, description, price, \
     is_available, prices_by_size, is_combination, max_flavors, created_at";

#[derive(FromRow)]
struct OrderRow {
    id: String,
    tenant_id: String,
    customer_id: Option<String>,
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    delivery_address: Option<String>,
    address_latitude: Option<f64>,
    address_longitude: Option<f64>,
    order_notes: Option<String>,
    status: String,
    subtotal: Decimal,
    delivery_fee: Decimal,
    total: Decimal,
    driver_id: Option<String>,
    delivery_type: String,
    payment_method: String,
    external_platform: Option<String>,
    external_order_id: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<OrderRow> for Order {
    type Error = StorageError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: parse_id(&row.id)?,
            tenant_id: parse_id(&row.tenant_id)?,
            customer_id: parse_opt_id(row.customer_id.as_deref())?,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            customer_email: row.customer_email,
            delivery_address: row.delivery_address,
            address_latitude: row.address_latitude,
            address_longitude: row.address_longitude,
            order_notes: row.order_notes,
            status: parse_enum::<OrderStatus>(&row.status)?,
            subtotal: row.subtotal,
            delivery_fee: row.delivery_fee,
            total: row.total,
            driver_id: parse_opt_id(row.driver_id.as_deref())?,
            delivery_type: parse_enum(&row.delivery_type)?,
            payment_method: row.payment_method,
            external_platform: row
                .external_platform
                .as_deref()
                .map(parse_enum::<ExternalPlatform>)
                .transpose()?,
            external_order_id: row.external_order_id,
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
        })
    }
}

const ORDER_COLUMNS: &str = "id, tenant_id, customer_id, customer_name, customer_phone, \
     customer_email, delivery_address, address_latitude, address_longitude, order_notes, status, \
     subtotal, delivery_fee, total, driver_id, delivery_type, payment_method, external_platform, \
     external_order_id, created_at, updated_at";

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    provider_intent_id: Option<String>,
    amount: Decimal,
    status: String,
    payment_method: Option<String>,
    created_at: NaiveDateTime,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StorageError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: parse_id(&row.id)?,
            order_id: parse_id(&row.order_id)?,
            provider_intent_id: row.provider_intent_id,
            amount: row.amount,
            status: parse_enum::<PaymentStatus>(&row.status)?,
            payment_method: row.payment_method,
            created_at: utc(row.created_at),
        })
    }
}

const PAYMENT_COLUMNS: &str =
    "id, order_id, provider_intent_id, amount, status, payment_method, created_at";

#[derive(FromRow)]
struct CommissionRow {
    id: String,
    tenant_id: String,
    order_id: String,
    order_total: Decimal,
    commission_percentage: Decimal,
    commission_amount: Decimal,
    is_paid: bool,
    created_at: NaiveDateTime,
}

impl TryFrom<CommissionRow> for Commission {
    type Error = StorageError;

    fn try_from(row: CommissionRow) -> Result<Self, Self::Error> {
        Ok(Commission {
            id: parse_id(&row.id)?,
            tenant_id: parse_id(&row.tenant_id)?,
            order_id: parse_id(&row.order_id)?,
            order_total: row.order_total,
            commission_percentage: row.commission_percentage,
            commission_amount: row.commission_amount,
            is_paid: row.is_paid,
            created_at: utc(row.created_at),
        })
    }
}

const COMMISSION_COLUMNS: &str = "id, tenant_id, order_id, order_total, commission_percentage, \
     commission_amount, is_paid, created_at";

#[derive(FromRow)]
struct AssignmentRow {
    id: String,
    order_id: String,
    driver_id: String,
    status: String,
    notified_at: NaiveDateTime,
    responded_at: Option<NaiveDateTime>,
}

impl TryFrom<AssignmentRow> for DriverAssignment {
    type Error = StorageError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(DriverAssignment {
            id: parse_id(&row.id)?,
            order_id: parse_id(&row.order_id)?,
            driver_id: parse_id(&row.driver_id)?,
            status: parse_enum::<AssignmentStatus>(&row.status)?,
            notified_at: utc(row.notified_at),
            responded_at: row.responded_at.map(utc),
        })
    }
}

const ASSIGNMENT_COLUMNS: &str = "id, order_id, driver_id, status, notified_at, responded_at";

async fn insert_order_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    new: &NewOrder,
) -> Result<Order, StorageError> {
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        tenant_id: new.tenant_id,
        customer_id: new.customer_id,
        customer_name: new.customer_name.clone(),
        customer_phone: new.customer_phone.clone(),
        customer_email: new.customer_email.clone(),
        delivery_address: new.delivery_address.clone(),
        address_latitude: new.address_latitude,
        address_longitude: new.address_longitude,
        order_notes: new.order_notes.clone(),
        status: new.status,
        subtotal: new.subtotal,
        delivery_fee: new.delivery_fee,
        total: new.total,
        driver_id: None,
        delivery_type: new.delivery_type,
        payment_method: new.payment_method.clone(),
        external_platform: new.external_platform,
        external_order_id: new.external_order_id.clone(),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO orders (
          id, tenant_id, customer_id, customer_name, customer_phone, customer_email,
          delivery_address, address_latitude, address_longitude, order_notes, status,
          subtotal, delivery_fee, total, driver_id, delivery_type, payment_method,
          external_platform, external_order_id, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?)
        "#,
    )
    .bind(order.id.to_string())
    .bind(order.tenant_id.to_string())
    .bind(order.customer_id.map(|u| u.to_string()))
    .bind(&order.customer_name)
    .bind(&order.customer_phone)
    .bind(&order.customer_email)
    .bind(&order.delivery_address)
    .bind(order.address_latitude)
    .bind(order.address_longitude)
    .bind(&order.order_notes)
    .bind(order.status.as_str())
    .bind(order.subtotal)
    .bind(order.delivery_fee)
    .bind(order.total)
    .bind(None::<String>)
    .bind(order.delivery_type.as_str())
    .bind(&order.payment_method)
    .bind(order.external_platform.map(|p| p.as_str()))
    .bind(&order.external_order_id)
    .bind(order.created_at.naive_utc())
    .bind(order.updated_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(order)
}

async fn insert_order_item_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    order_id: Uuid,
    new: NewOrderItem,
) -> Result<OrderItem, StorageError> {
    validate_item(&new)?;
    let item = OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: new.product_id,
        name: new.name,
        price: new.price,
        quantity: new.quantity,
        notes: new.notes,
    };
    sqlx::query(
        r#"
        INSERT INTO order_items (id, order_id, product_id, name, price, quantity, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.order_id.to_string())
    .bind(item.product_id.map(|u| u.to_string()))
    .bind(&item.name)
    .bind(item.price)
    .bind(item.quantity)
    .bind(&item.notes)
    .execute(&mut **tx)
    .await?;
    Ok(item)
}

async fn insert_payment_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    order_id: Uuid,
    new: NewPayment,
) -> Result<Payment, StorageError> {
    let payment = Payment {
        id: Uuid::new_v4(),
        order_id,
        provider_intent_id: new.provider_intent_id,
        amount: new.amount,
        status: new.status,
        payment_method: new.payment_method,
        created_at: Utc::now(),
    };
    sqlx::query(
        r#"
        INSERT INTO payments (id, order_id, provider_intent_id, amount, status, payment_method, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payment.id.to_string())
    .bind(payment.order_id.to_string())
    .bind(&payment.provider_intent_id)
    .bind(payment.amount)
    .bind(payment.status.as_str())
    .bind(&payment.payment_method)
    .bind(payment.created_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(payment)
}

async fn insert_commission_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    order_id: Uuid,
    new: NewCommission,
) -> Result<Commission, StorageError> {
    let commission = Commission {
        id: Uuid::new_v4(),
        tenant_id: new.tenant_id,
        order_id,
        order_total: new.order_total,
        commission_percentage: new.commission_percentage,
        commission_amount: new.commission_amount,
        is_paid: false,
        created_at: Utc::now(),
    };
    sqlx::query(
        r#"
        INSERT INTO commissions (id, tenant_id, order_id, order_total, commission_percentage, commission_amount, is_paid, created_at)
        VALUES (?, ?, ?, ?, ?, ?, FALSE, ?)
        "#,
    )
    .bind(commission.id.to_string())
    .bind(commission.tenant_id.to_string())
    .bind(commission.order_id.to_string())
    .bind(commission.order_total)
    .bind(commission.commission_percentage)
    .bind(commission.commission_amount)
    .bind(commission.created_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(commission)
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn create_tenant(&self, new: NewTenant) -> Result<Tenant, StorageError> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: new.name,
            slug: new.slug,
            phone: new.phone,
            address: new.address,
            is_active: true,
            commission_percentage: new.commission_percentage,
            delivery_fee_business: new.delivery_fee_business,
            delivery_fee_customer: new.delivery_fee_customer,
            operating_hours: new.operating_hours.unwrap_or_default(),
            created_at: Utc::now(),
        };
        let hours = serde_json::to_value(&tenant.operating_hours)
            .map_err(|e| StorageError::Invalid(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, slug, phone, address, is_active, commission_percentage,
                                 delivery_fee_business, delivery_fee_customer, operating_hours, created_at)
            VALUES (?, ?, ?, ?, ?, TRUE, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tenant.id.to_string())
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.phone)
        .bind(&tenant.address)
        .bind(tenant.commission_percentage)
        .bind(tenant.delivery_fee_business)
        .bind(tenant.delivery_fee_customer)
        .bind(&hours)
        .bind(tenant.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StorageError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Tenant::try_from).transpose()
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = ?");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Tenant::try_from).transpose()
    }

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE is_active = TRUE");
        let rows = sqlx::query_as::<_, TenantRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn update_tenant(&self, id: Uuid, data: TenantUpdate) -> Result<Tenant, StorageError> {
        let mut merged = self
            .get_tenant(id)
            .await?
            .ok_or(StorageError::NotFound("tenant"))?;
        if let Some(name) = data.name {
            merged.name = name;
        }
        if let Some(phone) = data.phone {
            merged.phone = Some(phone);
        }
        if let Some(address) = data.address {
            merged.address = Some(address);
        }
        if let Some(active) = data.is_active {
            merged.is_active = active;
        }
        if let Some(pct) = data.commission_percentage {
            merged.commission_percentage = pct;
        }
        if let Some(fee) = data.delivery_fee_business {
            merged.delivery_fee_business = fee;
        }
        if let Some(fee) = data.delivery_fee_customer {
            merged.delivery_fee_customer = fee;
        }
        if let Some(hours) = data.operating_hours {
            merged.operating_hours = hours;
        }
        let hours = serde_json::to_value(&merged.operating_hours)
            .map_err(|e| StorageError::Invalid(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE tenants
            SET name = ?, phone = ?, address = ?, is_active = ?, commission_percentage = ?,
                delivery_fee_business = ?, delivery_fee_customer = ?, operating_hours = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.name)
        .bind(&merged.phone)
        .bind(&merged.address)
        .bind(merged.is_active)
        .bind(merged.commission_percentage)
        .bind(merged.delivery_fee_business)
        .bind(merged.delivery_fee_customer)
        .bind(&hours)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StorageError> {
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            phone: new.phone,
            role: new.role,
            tenant_id: new.tenant_id,
            is_active: true,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, name, phone, role, tenant_id, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.tenant_id.map(|u| u.to_string()))
        .bind(user.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE role = ?");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ?");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn create_customer_profile(
        &self,
        new: NewCustomerProfile,
    ) -> Result<CustomerProfile, StorageError> {
        let profile = CustomerProfile {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            default_address: new.default_address,
            address_latitude: new.address_latitude,
            address_longitude: new.address_longitude,
            address_reference: new.address_reference,
        };
        sqlx::query(
            r#"
            INSERT INTO customer_profiles (id, user_id, default_address, address_latitude, address_longitude, address_reference)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(profile.id.to_string())
        .bind(profile.user_id.to_string())
        .bind(&profile.default_address)
        .bind(profile.address_latitude)
        .bind(profile.address_longitude)
        .bind(&profile.address_reference)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn get_customer_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CustomerProfile>, StorageError> {
        let row: Option<(String, String, Option<String>, Option<f64>, Option<f64>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT id, user_id, default_address, address_latitude, address_longitude, address_reference
                FROM customer_profiles WHERE user_id = ?
                "#,
            )
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(id, user_id, default_address, lat, lng, reference)| {
            Ok(CustomerProfile {
                id: parse_id(&id)?,
                user_id: parse_id(&user_id)?,
                default_address,
                address_latitude: lat,
                address_longitude: lng,
                address_reference: reference,
            })
        })
        .transpose()
    }

    async fn create_driver_profile(
        &self,
        new: NewDriverProfile,
    ) -> Result<DriverProfile, StorageError> {
        let profile = DriverProfile {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            vehicle_type: new.vehicle_type,
            vehicle_plate: new.vehicle_plate,
            status: DriverStatus::Offline,
            current_latitude: None,
            current_longitude: None,
            rating: None,
            total_deliveries: 0,
        };
        sqlx::query(
            r#"
            INSERT INTO driver_profiles (id, user_id, vehicle_type, vehicle_plate, status, total_deliveries)
            VALUES (?, ?, ?, ?, 'offline', 0)
            "#,
        )
        .bind(profile.id.to_string())
        .bind(profile.user_id.to_string())
        .bind(&profile.vehicle_type)
        .bind(&profile.vehicle_plate)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn get_driver_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DriverProfile>, StorageError> {
        let sql = format!("SELECT {DRIVER_PROFILE_COLUMNS} FROM driver_profiles WHERE user_id = ?");
        let row = sqlx::query_as::<_, DriverProfileRow>(&sql)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DriverProfile::try_from).transpose()
    }

    async fn list_available_drivers(&self) -> Result<Vec<DriverProfile>, StorageError> {
        let sql =
            format!("SELECT {DRIVER_PROFILE_COLUMNS} FROM driver_profiles WHERE status = 'available'");
        let rows = sqlx::query_as::<_, DriverProfileRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DriverProfile::try_from).collect()
    }

    async fn update_driver_status(
        &self,
        user_id: Uuid,
        status: DriverStatus,
    ) -> Result<DriverProfile, StorageError> {
        let result = sqlx::query("UPDATE driver_profiles SET status = ? WHERE user_id = ?")
            .bind(status.as_str())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("driver profile"));
        }
        self.get_driver_profile(user_id)
            .await?
            .ok_or(StorageError::NotFound("driver profile"))
    }

    async fn update_driver_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<DriverProfile, StorageError> {
        let result = sqlx::query(
            "UPDATE driver_profiles SET current_latitude = ?, current_longitude = ? WHERE user_id = ?",
        )
        .bind(latitude)
        .bind(longitude)
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("driver profile"));
        }
        self.get_driver_profile(user_id)
            .await?
            .ok_or(StorageError::NotFound("driver profile"))
    }

    async fn create_category(&self, new: NewCategory) -> Result<Category, StorageError> {
        let category = Category {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            slug: new.slug,
            display_order: new.display_order,
        };
        sqlx::query(
            "INSERT INTO categories (id, tenant_id, name, slug, display_order) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(category.id.to_string())
        .bind(category.tenant_id.to_string())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(category.display_order)
        .execute(&self.pool)
        .await?;
        Ok(category)
    }

    async fn list_categories_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Category>, StorageError> {
        let rows: Vec<(String, String, String, String, i32)> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, slug, display_order
            FROM categories WHERE tenant_id = ? ORDER BY display_order
            "#,
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, tenant_id, name, slug, display_order)| {
                Ok(Category {
                    id: parse_id(&id)?,
                    tenant_id: parse_id(&tenant_id)?,
                    name,
                    slug,
                    display_order,
                })
            })
            .collect()
    }

    async fn delete_category(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, StorageError> {
        let product = Product {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            category_id: new.category_id,
            name: new.name,
            description: new.description,
            price: new.price,
            is_available: true,
            prices_by_size: new.prices_by_size,
            is_combination: new.is_combination,
            max_flavors: new.max_flavors,
            created_at: Utc::now(),
        };
        let prices = product
            .prices_by_size
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StorageError::Invalid(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, category_id, name, description, price,
                                  is_available, prices_by_size, is_combination, max_flavors, created_at)
            VALUES (?, ?, ?, ?, ?, ?, TRUE, ?, ?, ?, ?)
            "#,
        )
        .bind(product.id.to_string())
        .bind(product.tenant_id.to_string())
        .bind(product.category_id.to_string())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(prices)
        .bind(product.is_combination)
        .bind(product.max_flavors)
        .bind(product.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn list_products_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?");
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn list_products_by_category(
        &self,
        category_id: Uuid,
    ) -> Result<Vec<Product>, StorageError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE category_id = ? AND is_available = TRUE"
        );
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(category_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn update_product(&self, id: Uuid, data: ProductUpdate) -> Result<Product, StorageError> {
        let mut merged = self
            .get_product(id)
            .await?
            .ok_or(StorageError::NotFound("product"))?;
        if let Some(name) = data.name {
            merged.name = name;
        }
        if let Some(description) = data.description {
            merged.description = description;
        }
        if let Some(price) = data.price {
            merged.price = price;
        }
        if let Some(available) = data.is_available {
            merged.is_available = available;
        }
        if let Some(prices) = data.prices_by_size {
            merged.prices_by_size = Some(prices);
        }
        let prices = merged
            .prices_by_size
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StorageError::Invalid(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE products
            SET name = ?, description = ?, price = ?, is_available = ?, prices_by_size = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.name)
        .bind(&merged.description)
        .bind(merged.price)
        .bind(merged.is_available)
        .bind(prices)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn delete_product(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_pizza_flavor(
        &self,
        new: NewPizzaFlavor,
    ) -> Result<PizzaFlavor, StorageError> {
        let flavor = PizzaFlavor {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            description: new.description,
            base_price: new.base_price,
            is_available: true,
        };
        sqlx::query(
            r#"
            INSERT INTO pizza_flavors (id, tenant_id, name, description, base_price, is_available)
            VALUES (?, ?, ?, ?, ?, TRUE)
            "#,
        )
        .bind(flavor.id.to_string())
        .bind(flavor.tenant_id.to_string())
        .bind(&flavor.name)
        .bind(&flavor.description)
        .bind(flavor.base_price)
        .execute(&self.pool)
        .await?;
        Ok(flavor)
    }

    async fn list_pizza_flavors_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<PizzaFlavor>, StorageError> {
        let rows: Vec<(String, String, String, Option<String>, Decimal, bool)> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, description, base_price, is_available
            FROM pizza_flavors WHERE tenant_id = ? AND is_available = TRUE
            "#,
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, tenant_id, name, description, base_price, is_available)| {
                Ok(PizzaFlavor {
                    id: parse_id(&id)?,
                    tenant_id: parse_id(&tenant_id)?,
                    name,
                    description,
                    base_price,
                    is_available,
                })
            })
            .collect()
    }

    async fn link_product_flavor(
        &self,
        product_id: Uuid,
        flavor_id: Uuid,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT IGNORE INTO product_flavors (product_id, flavor_id) VALUES (?, ?)")
            .bind(product_id.to_string())
            .bind(flavor_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_product_flavors(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<PizzaFlavor>, StorageError> {
        let rows: Vec<(String, String, String, Option<String>, Decimal, bool)> = sqlx::query_as(
            r#"
            SELECT f.id, f.tenant_id, f.name, f.description, f.base_price, f.is_available
            FROM product_flavors pf
            INNER JOIN pizza_flavors f ON f.id = pf.flavor_id
            WHERE pf.product_id = ?
            "#,
        )
        .bind(product_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, tenant_id, name, description, base_price, is_available)| {
                Ok(PizzaFlavor {
                    id: parse_id(&id)?,
                    tenant_id: parse_id(&tenant_id)?,
                    name,
                    description,
                    base_price,
                    is_available,
                })
            })
            .collect()
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order = insert_order_tx(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StorageError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn get_order_by_external_reference(
        &self,
        tenant_id: Uuid,
        platform: ExternalPlatform,
        external_order_id: &str,
    ) -> Result<Option<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE tenant_id = ? AND external_platform = ? AND external_order_id = ?"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(tenant_id.to_string())
            .bind(platform.as_str())
            .bind(external_order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE tenant_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_orders_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(customer_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_orders_by_driver(&self, driver_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE driver_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(driver_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_pending_orders_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE tenant_id = ? AND status = 'pending' ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StorageError> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().naive_utc())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("order"));
        }
        self.get_order(id).await?.ok_or(StorageError::NotFound("order"))
    }

    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, StorageError> {
        let result = sqlx::query("UPDATE orders SET driver_id = ?, updated_at = ? WHERE id = ?")
            .bind(driver_id.to_string())
            .bind(Utc::now().naive_utc())
            .bind(order_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("order"));
        }
        self.get_order(order_id)
            .await?
            .ok_or(StorageError::NotFound("order"))
    }

    async fn create_order_with_transaction(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
        payment: Option<NewPayment>,
        commission: Option<NewCommission>,
    ) -> Result<OrderBundle, StorageError> {
        let mut tx = self.pool.begin().await?;

        let created_order = insert_order_tx(&mut tx, &order).await?;
        let mut created_items = Vec::with_capacity(items.len());
        for item in items {
            created_items.push(insert_order_item_tx(&mut tx, created_order.id, item).await?);
        }
        let created_payment = match payment {
            Some(p) => Some(insert_payment_tx(&mut tx, created_order.id, p).await?),
            None => None,
        };
        let created_commission = match commission {
            Some(c) => Some(insert_commission_tx(&mut tx, created_order.id, c).await?),
            None => None,
        };

        tx.commit().await?;
        Ok(OrderBundle {
            order: created_order,
            items: created_items,
            payment: created_payment,
            commission: created_commission,
        })
    }

    async fn create_order_item(
        &self,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<OrderItem, StorageError> {
        let mut tx = self.pool.begin().await?;
        let item = insert_order_item_tx(&mut tx, order_id, item).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StorageError> {
        let rows: Vec<(String, String, Option<String>, String, Decimal, i32, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT id, order_id, product_id, name, price, quantity, notes
                FROM order_items WHERE order_id = ?
                "#,
            )
            .bind(order_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(id, order_id, product_id, name, price, quantity, notes)| {
                Ok(OrderItem {
                    id: parse_id(&id)?,
                    order_id: parse_id(&order_id)?,
                    product_id: parse_opt_id(product_id.as_deref())?,
                    name,
                    price,
                    quantity,
                    notes,
                })
            })
            .collect()
    }

    async fn create_payment(
        &self,
        order_id: Uuid,
        payment: NewPayment,
    ) -> Result<Payment, StorageError> {
        let mut tx = self.pool.begin().await?;
        let payment = insert_payment_tx(&mut tx, order_id, payment).await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn get_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StorageError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Payment, StorageError> {
        let result = sqlx::query("UPDATE payments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("payment"));
        }
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Payment::try_from(row)
    }

    async fn set_payment_intent_id(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<Payment, StorageError> {
        let result = sqlx::query("UPDATE payments SET provider_intent_id = ? WHERE id = ?")
            .bind(intent_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("payment"));
        }
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Payment::try_from(row)
    }

    async fn update_payment_and_order_status(
        &self,
        payment_id: Uuid,
        payment_status: PaymentStatus,
        order_id: Uuid,
        order_status: OrderStatus,
    ) -> Result<(Payment, Order), StorageError> {
        // One transaction for both writes; the payment/order coupling is
        // never observable half-applied. Payment first, then order.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE payments SET status = ? WHERE id = ?")
            .bind(payment_status.as_str())
            .bind(payment_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("payment"));
        }

        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(order_status.as_str())
            .bind(Utc::now().naive_utc())
            .bind(order_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("order"));
        }

        let payment_sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?");
        let payment_row = sqlx::query_as::<_, PaymentRow>(&payment_sql)
            .bind(payment_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let order_sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let order_row = sqlx::query_as::<_, OrderRow>(&order_sql)
            .bind(order_id.to_string())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((Payment::try_from(payment_row)?, Order::try_from(order_row)?))
    }

    async fn create_commission(
        &self,
        order_id: Uuid,
        commission: NewCommission,
    ) -> Result<Commission, StorageError> {
        let mut tx = self.pool.begin().await?;
        let commission = insert_commission_tx(&mut tx, order_id, commission).await?;
        tx.commit().await?;
        Ok(commission)
    }

    async fn list_commissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Commission>, StorageError> {
        let sql = format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE tenant_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Commission::try_from).collect()
    }

    async fn list_unpaid_commissions(&self) -> Result<Vec<Commission>, StorageError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE is_paid = FALSE");
        let rows = sqlx::query_as::<_, CommissionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Commission::try_from).collect()
    }

    async fn mark_commission_paid(&self, id: Uuid) -> Result<Commission, StorageError> {
        let result = sqlx::query("UPDATE commissions SET is_paid = TRUE WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("commission"));
        }
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE id = ?");
        let row = sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Commission::try_from(row)
    }

    async fn create_driver_assignment(
        &self,
        new: NewDriverAssignment,
    ) -> Result<DriverAssignment, StorageError> {
        let assignment = DriverAssignment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            driver_id: new.driver_id,
            status: AssignmentStatus::Pending,
            notified_at: Utc::now(),
            responded_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO driver_assignments (id, order_id, driver_id, status, notified_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(assignment.id.to_string())
        .bind(assignment.order_id.to_string())
        .bind(assignment.driver_id.to_string())
        .bind(assignment.notified_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(assignment)
    }

    async fn list_assignments_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError> {
        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM driver_assignments WHERE order_id = ?");
        let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(order_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DriverAssignment::try_from).collect()
    }

    async fn list_pending_assignments_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM driver_assignments \
             WHERE driver_id = ? AND status = 'pending'"
        );
        let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(driver_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DriverAssignment::try_from).collect()
    }

    async fn respond_to_assignment(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<DriverAssignment, StorageError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT order_id FROM driver_assignments WHERE id = ? FOR UPDATE")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((order_id,)) = row else {
            return Err(StorageError::NotFound("driver assignment"));
        };

        // At most one assignment per order may be accepted.
        if status == AssignmentStatus::Accepted {
            let (accepted,): (i64,) = sqlx::query_as(
                r#"
                SELECT COUNT(*) FROM driver_assignments
                WHERE order_id = ? AND id <> ? AND status = 'accepted'
                "#,
            )
            .bind(&order_id)
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
            if accepted > 0 {
                return Err(StorageError::Conflict(
                    "order already has an accepted assignment".into(),
                ));
            }
        }

        sqlx::query("UPDATE driver_assignments SET status = ?, responded_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().naive_utc())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM driver_assignments WHERE id = ?");
        let row = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        DriverAssignment::try_from(row)
    }

    async fn create_rating(&self, new: NewRating) -> Result<Rating, StorageError> {
        let rating = Rating {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            order_id: new.order_id,
            driver_id: new.driver_id,
            stars: new.stars,
            comment: new.comment,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO ratings (id, tenant_id, order_id, driver_id, stars, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(rating.id.to_string())
        .bind(rating.tenant_id.to_string())
        .bind(rating.order_id.to_string())
        .bind(rating.driver_id.map(|u| u.to_string()))
        .bind(rating.stars)
        .bind(&rating.comment)
        .bind(rating.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(rating)
    }

    async fn list_ratings_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Rating>, StorageError> {
        let rows: Vec<(String, String, String, Option<String>, i32, Option<String>, NaiveDateTime)> =
            sqlx::query_as(
                r#"
                SELECT id, tenant_id, order_id, driver_id, stars, comment, created_at
                FROM ratings WHERE tenant_id = ?
                "#,
            )
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(id, tenant_id, order_id, driver_id, stars, comment, created_at)| {
                Ok(Rating {
                    id: parse_id(&id)?,
                    tenant_id: parse_id(&tenant_id)?,
                    order_id: parse_id(&order_id)?,
                    driver_id: parse_opt_id(driver_id.as_deref())?,
                    stars,
                    comment,
                    created_at: utc(created_at),
                })
            })
            .collect()
    }

    async fn create_promotion(&self, new: NewPromotion) -> Result<Promotion, StorageError> {
        let promotion = Promotion {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            description: new.description,
            discount_percentage: new.discount_percentage,
            is_active: true,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO promotions (id, tenant_id, name, description, discount_percentage,
                                    is_active, starts_at, ends_at, created_at)
            VALUES (?, ?, ?, ?, ?, TRUE, ?, ?, ?)
            "#,
        )
        .bind(promotion.id.to_string())
        .bind(promotion.tenant_id.to_string())
        .bind(&promotion.name)
        .bind(&promotion.description)
        .bind(promotion.discount_percentage)
        .bind(promotion.starts_at.naive_utc())
        .bind(promotion.ends_at.naive_utc())
        .bind(promotion.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(promotion)
    }

    async fn list_active_promotions(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Promotion>, StorageError> {
        let rows: Vec<(
            String,
            String,
            String,
            Option<String>,
            Decimal,
            bool,
            NaiveDateTime,
            NaiveDateTime,
            NaiveDateTime,
        )> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, description, discount_percentage,
                   is_active, starts_at, ends_at, created_at
            FROM promotions
            WHERE tenant_id = ? AND is_active = TRUE AND starts_at <= ? AND ends_at >= ?
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(Utc::now().naive_utc())
        .bind(Utc::now().naive_utc())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(
                |(id, tenant_id, name, description, pct, is_active, starts_at, ends_at, created_at)| {
                    Ok(Promotion {
                        id: parse_id(&id)?,
                        tenant_id: parse_id(&tenant_id)?,
                        name,
                        description,
                        discount_percentage: pct,
                        is_active,
                        starts_at: utc(starts_at),
                        ends_at: utc(ends_at),
                        created_at: utc(created_at),
                    })
                },
            )
            .collect()
    }
}
