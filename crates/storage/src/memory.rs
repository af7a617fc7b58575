//! In-memory backend. Serves as the degraded-mode fallback when the
//! database is unreachable and as the test double for repository
//! semantics. Best effort only: contents live for the process lifetime
//! and are lost on restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{OrderBundle, Storage, StorageError};
use domain::{
    AssignmentStatus, Category, Commission, CustomerProfile, DriverAssignment, DriverProfile,
    DriverStatus, ExternalPlatform, NewCategory, NewCommission, NewCustomerProfile,
    NewDriverAssignment, NewDriverProfile, NewOrder, NewOrderItem, NewPayment, NewPizzaFlavor,
    NewProduct, NewPromotion, NewRating, NewTenant, NewUser, Order, OrderItem, OrderStatus,
    Payment, PaymentStatus, PizzaFlavor, Product, ProductUpdate, Promotion, Rating, Role, Tenant,
    TenantUpdate, User,
};

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    customer_profiles: HashMap<Uuid, CustomerProfile>,
    driver_profiles: HashMap<Uuid, DriverProfile>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    pizza_flavors: HashMap<Uuid, PizzaFlavor>,
    product_flavors: Vec<(Uuid, Uuid)>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
    payments: HashMap<Uuid, Payment>,
    commissions: HashMap<Uuid, Commission>,
    driver_assignments: HashMap<Uuid, DriverAssignment>,
    ratings: HashMap<Uuid, Rating>,
    promotions: HashMap<Uuid, Promotion>,
}

/// All tables behind one lock; compound writes hold it for their whole
/// duration, which is what makes them atomic here.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock means another thread panicked mid-write;
        // degraded mode keeps serving with whatever state remains.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_order(new: NewOrder) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        tenant_id: new.tenant_id,
        customer_id: new.customer_id,
        customer_name: new.customer_name,
        customer_phone: new.customer_phone,
        customer_email: new.customer_email,
        delivery_address: new.delivery_address,
        address_latitude: new.address_latitude,
        address_longitude: new.address_longitude,
        order_notes: new.order_notes,
        status: new.status,
        subtotal: new.subtotal,
        delivery_fee: new.delivery_fee,
        total: new.total,
        driver_id: None,
        delivery_type: new.delivery_type,
        payment_method: new.payment_method,
        external_platform: new.external_platform,
        external_order_id: new.external_order_id,
        created_at: now,
        updated_at: now,
    }
}

fn build_item(order_id: Uuid, new: NewOrderItem) -> Result<OrderItem, StorageError> {
    if new.quantity < 1 {
        return Err(StorageError::Invalid(format!(
            "order item '{}' has non-positive quantity {}",
            new.name, new.quantity
        )));
    }
    if new.price.is_sign_negative() {
        return Err(StorageError::Invalid(format!(
            "order item '{}' has negative price",
            new.name
        )));
    }
    Ok(OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: new.product_id,
        name: new.name,
        price: new.price,
        quantity: new.quantity,
        notes: new.notes,
    })
}

fn external_reference_taken(
    tables: &Tables,
    tenant_id: Uuid,
    platform: Option<ExternalPlatform>,
    external_order_id: Option<&str>,
) -> bool {
    let (Some(platform), Some(ext_id)) = (platform, external_order_id) else {
        return false;
    };
    tables.orders.values().any(|o| {
        o.tenant_id == tenant_id
            && o.external_platform == Some(platform)
            && o.external_order_id.as_deref() == Some(ext_id)
    })
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_tenant(&self, new: NewTenant) -> Result<Tenant, StorageError> {
        let mut tables = self.lock();
        if tables.tenants.values().any(|t| t.slug == new.slug) {
            return Err(StorageError::Conflict(format!(
                "tenant slug '{}' already exists",
                new.slug
            )));
        }
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
        tables.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StorageError> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(self.lock().tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        Ok(self
            .lock()
            .tenants
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn update_tenant(&self, id: Uuid, data: TenantUpdate) -> Result<Tenant, StorageError> {
        let mut tables = self.lock();
        let tenant = tables
            .tenants
            .get_mut(&id)
            .ok_or(StorageError::NotFound("tenant"))?;
        if let Some(name) = data.name {
            tenant.name = name;
        }
        if let Some(phone) = data.phone {
            tenant.phone = Some(phone);
        }
        if let Some(address) = data.address {
            tenant.address = Some(address);
        }
        if let Some(active) = data.is_active {
            tenant.is_active = active;
        }
        if let Some(pct) = data.commission_percentage {
            tenant.commission_percentage = pct;
        }
        if let Some(fee) = data.delivery_fee_business {
            tenant.delivery_fee_business = fee;
        }
        if let Some(fee) = data.delivery_fee_customer {
            tenant.delivery_fee_customer = fee;
        }
        if let Some(hours) = data.operating_hours {
            tenant.operating_hours = hours;
        }
        Ok(tenant.clone())
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StorageError> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.email == new.email) {
            return Err(StorageError::Conflict(format!(
                "email '{}' already registered",
                new.email
            )));
        }
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
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<User>, StorageError> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect())
    }

    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.tenant_id == Some(tenant_id))
            .cloned()
            .collect())
    }

    async fn create_customer_profile(
        &self,
        new: NewCustomerProfile,
    ) -> Result<CustomerProfile, StorageError> {
        let mut tables = self.lock();
        let profile = CustomerProfile {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            default_address: new.default_address,
            address_latitude: new.address_latitude,
            address_longitude: new.address_longitude,
            address_reference: new.address_reference,
        };
        tables.customer_profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn get_customer_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CustomerProfile>, StorageError> {
        Ok(self
            .lock()
            .customer_profiles
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn create_driver_profile(
        &self,
        new: NewDriverProfile,
    ) -> Result<DriverProfile, StorageError> {
        let mut tables = self.lock();
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
        tables.driver_profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn get_driver_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DriverProfile>, StorageError> {
        Ok(self
            .lock()
            .driver_profiles
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn list_available_drivers(&self) -> Result<Vec<DriverProfile>, StorageError> {
        Ok(self
            .lock()
            .driver_profiles
            .values()
            .filter(|p| p.status == DriverStatus::Available)
            .cloned()
            .collect())
    }

    async fn update_driver_status(
        &self,
        user_id: Uuid,
        status: DriverStatus,
    ) -> Result<DriverProfile, StorageError> {
        let mut tables = self.lock();
        let profile = tables
            .driver_profiles
            .values_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(StorageError::NotFound("driver profile"))?;
        profile.status = status;
        Ok(profile.clone())
    }

    async fn update_driver_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<DriverProfile, StorageError> {
        let mut tables = self.lock();
        let profile = tables
            .driver_profiles
            .values_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(StorageError::NotFound("driver profile"))?;
        profile.current_latitude = Some(latitude);
        profile.current_longitude = Some(longitude);
        Ok(profile.clone())
    }

    async fn create_category(&self, new: NewCategory) -> Result<Category, StorageError> {
        let mut tables = self.lock();
        let category = Category {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            slug: new.slug,
            display_order: new.display_order,
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list_categories_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Category>, StorageError> {
        let mut out: Vec<Category> = self
            .lock()
            .categories
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.display_order);
        Ok(out)
    }

    async fn delete_category(&self, id: Uuid) -> Result<(), StorageError> {
        self.lock().categories.remove(&id);
        Ok(())
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, StorageError> {
        let mut tables = self.lock();
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
        tables.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StorageError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn list_products_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Product>, StorageError> {
        Ok(self
            .lock()
            .products
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_products_by_category(
        &self,
        category_id: Uuid,
    ) -> Result<Vec<Product>, StorageError> {
        Ok(self
            .lock()
            .products
            .values()
            .filter(|p| p.category_id == category_id && p.is_available)
            .cloned()
            .collect())
    }

    async fn update_product(&self, id: Uuid, data: ProductUpdate) -> Result<Product, StorageError> {
        let mut tables = self.lock();
        let product = tables
            .products
            .get_mut(&id)
            .ok_or(StorageError::NotFound("product"))?;
        if let Some(name) = data.name {
            product.name = name;
        }
        if let Some(description) = data.description {
            product.description = description;
        }
        if let Some(price) = data.price {
            product.price = price;
        }
        if let Some(available) = data.is_available {
            product.is_available = available;
        }
        if let Some(prices) = data.prices_by_size {
            product.prices_by_size = Some(prices);
        }
        Ok(product.clone())
    }

    async fn delete_product(&self, id: Uuid) -> Result<(), StorageError> {
        self.lock().products.remove(&id);
        Ok(())
    }

    async fn create_pizza_flavor(
        &self,
        new: NewPizzaFlavor,
    ) -> Result<PizzaFlavor, StorageError> {
        let mut tables = self.lock();
        let flavor = PizzaFlavor {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            description: new.description,
            base_price: new.base_price,
            is_available: true,
        };
        tables.pizza_flavors.insert(flavor.id, flavor.clone());
        Ok(flavor)
    }

    async fn list_pizza_flavors_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<PizzaFlavor>, StorageError> {
        Ok(self
            .lock()
            .pizza_flavors
            .values()
            .filter(|f| f.tenant_id == tenant_id && f.is_available)
            .cloned()
            .collect())
    }

    async fn link_product_flavor(
        &self,
        product_id: Uuid,
        flavor_id: Uuid,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        if !tables.product_flavors.contains(&(product_id, flavor_id)) {
            tables.product_flavors.push((product_id, flavor_id));
        }
        Ok(())
    }

    async fn list_product_flavors(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<PizzaFlavor>, StorageError> {
        let tables = self.lock();
        let ids: Vec<Uuid> = tables
            .product_flavors
            .iter()
            .filter(|(p, _)| *p == product_id)
            .map(|(_, f)| *f)
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| tables.pizza_flavors.get(id).cloned())
            .collect())
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order, StorageError> {
        let mut tables = self.lock();
        if external_reference_taken(
            &tables,
            new.tenant_id,
            new.external_platform,
            new.external_order_id.as_deref(),
        ) {
            return Err(StorageError::Conflict("external order id already ingested".into()));
        }
        let order = build_order(new);
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StorageError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn get_order_by_external_reference(
        &self,
        tenant_id: Uuid,
        platform: ExternalPlatform,
        external_order_id: &str,
    ) -> Result<Option<Order>, StorageError> {
        Ok(self
            .lock()
            .orders
            .values()
            .find(|o| {
                o.tenant_id == tenant_id
                    && o.external_platform == Some(platform)
                    && o.external_order_id.as_deref() == Some(external_order_id)
            })
            .cloned())
    }

    async fn list_orders_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let mut out: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_orders_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let mut out: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.customer_id == Some(customer_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_orders_by_driver(&self, driver_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let mut out: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.driver_id == Some(driver_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_pending_orders_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Order>, StorageError> {
        let mut out: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.tenant_id == tenant_id && o.status == OrderStatus::Pending)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StorageError> {
        let mut tables = self.lock();
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or(StorageError::NotFound("order"))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, StorageError> {
        let mut tables = self.lock();
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or(StorageError::NotFound("order"))?;
        order.driver_id = Some(driver_id);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn create_order_with_transaction(
        &self,
        new_order: NewOrder,
        items: Vec<NewOrderItem>,
        payment: Option<NewPayment>,
        commission: Option<NewCommission>,
    ) -> Result<OrderBundle, StorageError> {
        let mut tables = self.lock();
        if external_reference_taken(
            &tables,
            new_order.tenant_id,
            new_order.external_platform,
            new_order.external_order_id.as_deref(),
        ) {
            return Err(StorageError::Conflict("external order id already ingested".into()));
        }

        let order = build_order(new_order);
        tables.orders.insert(order.id, order.clone());

        // Sequential writes; any failure unwinds what this call wrote.
        let mut created_items = Vec::with_capacity(items.len());
        for item in items {
            match build_item(order.id, item) {
                Ok(item) => {
                    tables.order_items.insert(item.id, item.clone());
                    created_items.push(item);
                }
                Err(err) => {
                    for rollback in &created_items {
                        tables.order_items.remove(&rollback.id);
                    }
                    tables.orders.remove(&order.id);
                    return Err(err);
                }
            }
        }

        let payment = payment.map(|p| {
            let payment = Payment {
                id: Uuid::new_v4(),
                order_id: order.id,
                provider_intent_id: p.provider_intent_id,
                amount: p.amount,
                status: p.status,
                payment_method: p.payment_method,
                created_at: Utc::now(),
            };
            tables.payments.insert(payment.id, payment.clone());
            payment
        });

        let commission = commission.map(|c| {
            let commission = Commission {
                id: Uuid::new_v4(),
                tenant_id: c.tenant_id,
                order_id: order.id,
                order_total: c.order_total,
                commission_percentage: c.commission_percentage,
                commission_amount: c.commission_amount,
                is_paid: false,
                created_at: Utc::now(),
            };
            tables.commissions.insert(commission.id, commission.clone());
            commission
        });

        Ok(OrderBundle {
            order,
            items: created_items,
            payment,
            commission,
        })
    }

    async fn create_order_item(
        &self,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<OrderItem, StorageError> {
        let mut tables = self.lock();
        if !tables.orders.contains_key(&order_id) {
            return Err(StorageError::NotFound("order"));
        }
        let item = build_item(order_id, item)?;
        tables.order_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn list_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StorageError> {
        Ok(self
            .lock()
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn create_payment(
        &self,
        order_id: Uuid,
        new: NewPayment,
    ) -> Result<Payment, StorageError> {
        let mut tables = self.lock();
        if !tables.orders.contains_key(&order_id) {
            return Err(StorageError::NotFound("order"));
        }
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id,
            provider_intent_id: new.provider_intent_id,
            amount: new.amount,
            status: new.status,
            payment_method: new.payment_method,
            created_at: Utc::now(),
        };
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StorageError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Payment, StorageError> {
        let mut tables = self.lock();
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or(StorageError::NotFound("payment"))?;
        payment.status = status;
        Ok(payment.clone())
    }

    async fn set_payment_intent_id(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<Payment, StorageError> {
        let mut tables = self.lock();
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or(StorageError::NotFound("payment"))?;
        payment.provider_intent_id = Some(intent_id.to_string());
        Ok(payment.clone())
    }

    async fn update_payment_and_order_status(
        &self,
        payment_id: Uuid,
        payment_status: PaymentStatus,
        order_id: Uuid,
        order_status: OrderStatus,
    ) -> Result<(Payment, Order), StorageError> {
        // Both rows checked before either is touched, then mutated under
        // the same guard, so the coupling is observed together or not at all.
        let mut tables = self.lock();
        if !tables.payments.contains_key(&payment_id) {
            return Err(StorageError::NotFound("payment"));
        }
        if !tables.orders.contains_key(&order_id) {
            return Err(StorageError::NotFound("order"));
        }
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .expect("checked above");
        payment.status = payment_status;
        let payment = payment.clone();
        let order = tables.orders.get_mut(&order_id).expect("checked above");
        order.status = order_status;
        order.updated_at = Utc::now();
        Ok((payment, order.clone()))
    }

    async fn create_commission(
        &self,
        order_id: Uuid,
        new: NewCommission,
    ) -> Result<Commission, StorageError> {
        let mut tables = self.lock();
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
        tables.commissions.insert(commission.id, commission.clone());
        Ok(commission)
    }

    async fn list_commissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Commission>, StorageError> {
        let mut out: Vec<Commission> = self
            .lock()
            .commissions
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_unpaid_commissions(&self) -> Result<Vec<Commission>, StorageError> {
        Ok(self
            .lock()
            .commissions
            .values()
            .filter(|c| !c.is_paid)
            .cloned()
            .collect())
    }

    async fn mark_commission_paid(&self, id: Uuid) -> Result<Commission, StorageError> {
        let mut tables = self.lock();
        let commission = tables
            .commissions
            .get_mut(&id)
            .ok_or(StorageError::NotFound("commission"))?;
        commission.is_paid = true;
        Ok(commission.clone())
    }

    async fn create_driver_assignment(
        &self,
        new: NewDriverAssignment,
    ) -> Result<DriverAssignment, StorageError> {
        let mut tables = self.lock();
        let assignment = DriverAssignment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            driver_id: new.driver_id,
            status: AssignmentStatus::Pending,
            notified_at: Utc::now(),
            responded_at: None,
        };
        tables
            .driver_assignments
            .insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn list_assignments_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError> {
        Ok(self
            .lock()
            .driver_assignments
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_pending_assignments_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<DriverAssignment>, StorageError> {
        Ok(self
            .lock()
            .driver_assignments
            .values()
            .filter(|a| a.driver_id == driver_id && a.status == AssignmentStatus::Pending)
            .cloned()
            .collect())
    }

    async fn respond_to_assignment(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<DriverAssignment, StorageError> {
        let mut tables = self.lock();
        let order_id = tables
            .driver_assignments
            .get(&id)
            .ok_or(StorageError::NotFound("driver assignment"))?
            .order_id;
        // At most one assignment per order may be accepted.
        if status == AssignmentStatus::Accepted
            && tables.driver_assignments.values().any(|a| {
                a.order_id == order_id && a.id != id && a.status == AssignmentStatus::Accepted
            })
        {
            return Err(StorageError::Conflict(
                "order already has an accepted assignment".into(),
            ));
        }
        let assignment = tables
            .driver_assignments
            .get_mut(&id)
            .expect("checked above");
        assignment.status = status;
        assignment.responded_at = Some(Utc::now());
        Ok(assignment.clone())
    }

    async fn create_rating(&self, new: NewRating) -> Result<Rating, StorageError> {
        let mut tables = self.lock();
        let rating = Rating {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            order_id: new.order_id,
            driver_id: new.driver_id,
            stars: new.stars,
            comment: new.comment,
            created_at: Utc::now(),
        };
        tables.ratings.insert(rating.id, rating.clone());
        Ok(rating)
    }

    async fn list_ratings_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Rating>, StorageError> {
        Ok(self
            .lock()
            .ratings
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create_promotion(&self, new: NewPromotion) -> Result<Promotion, StorageError> {
        let mut tables = self.lock();
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
        tables.promotions.insert(promotion.id, promotion.clone());
        Ok(promotion)
    }

    async fn list_active_promotions(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Promotion>, StorageError> {
        let now = Utc::now();
        Ok(self
            .lock()
            .promotions
            .values()
            .filter(|p| {
                p.tenant_id == tenant_id && p.is_active && p.starts_at <= now && p.ends_at >= now
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DeliveryType;
    use rust_decimal::Decimal;

    fn order_fixture(tenant_id: Uuid, subtotal: Decimal, fee: Decimal) -> NewOrder {
        NewOrder {
            tenant_id,
            customer_id: None,
            customer_name: "Maria Souza".into(),
            customer_phone: "+5511999990000".into(),
            customer_email: Some("maria@example.com".into()),
            delivery_address: Some("Rua das Flores, 100".into()),
            address_latitude: Some(-23.5505),
            address_longitude: Some(-46.6333),
            order_notes: None,
            status: OrderStatus::Pending,
            subtotal,
            delivery_fee: fee,
            total: subtotal + fee,
            delivery_type: DeliveryType::Delivery,
            payment_method: "card".into(),
            external_platform: None,
            external_order_id: None,
        }
    }

    fn item_fixture(name: &str, price: &str, quantity: i32) -> NewOrderItem {
        NewOrderItem {
            product_id: None,
            name: name.into(),
            price: price.parse().unwrap(),
            quantity,
            notes: None,
        }
    }

    #[tokio::test]
    async fn compound_create_persists_all_rows() {
        let storage = MemoryStorage::new();
        let tenant_id = Uuid::new_v4();
        let order = order_fixture(tenant_id, "40.00".parse().unwrap(), "5.00".parse().unwrap());
        let payment = NewPayment {
            provider_intent_id: None,
            amount: "45.00".parse().unwrap(),
            status: PaymentStatus::Pending,
            payment_method: Some("card".into()),
        };
        let commission =
            NewCommission::snapshot(tenant_id, "45.00".parse().unwrap(), "10.00".parse().unwrap());

        let bundle = storage
            .create_order_with_transaction(
                order,
                vec![item_fixture("Pizza Margherita", "40.00", 1)],
                Some(payment),
                Some(commission),
            )
            .await
            .unwrap();

        assert_eq!(bundle.items.len(), 1);
        let stored = storage.get_order(bundle.order.id).await.unwrap().unwrap();
        assert_eq!(stored.total, "45.00".parse::<Decimal>().unwrap());
        assert!(storage
            .get_payment_by_order(bundle.order.id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            storage.list_order_items(bundle.order.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn failed_item_insert_rolls_back_order_and_payment() {
        let storage = MemoryStorage::new();
        let tenant_id = Uuid::new_v4();
        let order = order_fixture(tenant_id, "40.00".parse().unwrap(), "5.00".parse().unwrap());
        let payment = NewPayment {
            provider_intent_id: None,
            amount: "45.00".parse().unwrap(),
            status: PaymentStatus::Pending,
            payment_method: Some("card".into()),
        };

        let result = storage
            .create_order_with_transaction(
                order,
                vec![
                    item_fixture("Pizza Calabresa", "40.00", 1),
                    // Injected fault: invalid quantity fails the second insert.
                    item_fixture("Refrigerante", "5.00", 0),
                ],
                Some(payment),
                None,
            )
            .await;

        assert!(matches!(result, Err(StorageError::Invalid(_))));
        let tables = storage.lock();
        assert!(tables.orders.is_empty());
        assert!(tables.order_items.is_empty());
        assert!(tables.payments.is_empty());
    }

    #[tokio::test]
    async fn external_reference_is_a_dedup_key() {
        let storage = MemoryStorage::new();
        let tenant_id = Uuid::new_v4();
        let mut order = order_fixture(tenant_id, "30.00".parse().unwrap(), Decimal::ZERO);
        order.external_platform = Some(ExternalPlatform::Ifood);
        order.external_order_id = Some("IF-1234".into());

        storage
            .create_order_with_transaction(order.clone(), vec![], None, None)
            .await
            .unwrap();
        let replay = storage
            .create_order_with_transaction(order, vec![], None, None)
            .await;
        assert!(matches!(replay, Err(StorageError::Conflict(_))));

        let found = storage
            .get_order_by_external_reference(tenant_id, ExternalPlatform::Ifood, "IF-1234")
            .await
            .unwrap();
        assert!(found.is_some());

        // Same external id on another platform is a different order.
        let mut other = order_fixture(tenant_id, "30.00".parse().unwrap(), Decimal::ZERO);
        other.external_platform = Some(ExternalPlatform::UberEats);
        other.external_order_id = Some("IF-1234".into());
        storage
            .create_order_with_transaction(other, vec![], None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn total_invariant_holds_across_randomized_orders() {
        use rand::Rng;

        let storage = MemoryStorage::new();
        let tenant_id = Uuid::new_v4();
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let subtotal = Decimal::new(rng.gen_range(0..=100_000), 2);
            let fee = Decimal::new(rng.gen_range(0..=2_000), 2);
            let order = order_fixture(tenant_id, subtotal, fee);
            let bundle = storage
                .create_order_with_transaction(order, vec![], None, None)
                .await
                .unwrap();
            assert_eq!(bundle.order.total, subtotal + fee);
        }
    }

    #[tokio::test]
    async fn commission_snapshot_survives_tenant_rate_change() {
        let storage = MemoryStorage::new();
        let tenant = storage
            .create_tenant(NewTenant {
                name: "Pizzaria do Wilson".into(),
                slug: "pizzaria-wilson".into(),
                phone: None,
                address: None,
                commission_percentage: "10.00".parse().unwrap(),
                delivery_fee_business: Decimal::ZERO,
                delivery_fee_customer: "5.00".parse().unwrap(),
                operating_hours: None,
            })
            .await
            .unwrap();

        let order = order_fixture(tenant.id, "100.00".parse().unwrap(), Decimal::ZERO);
        let commission = NewCommission::snapshot(
            tenant.id,
            "100.00".parse().unwrap(),
            tenant.commission_percentage,
        );
        let bundle = storage
            .create_order_with_transaction(order, vec![], None, Some(commission))
            .await
            .unwrap();

        storage
            .update_tenant(
                tenant.id,
                TenantUpdate {
                    commission_percentage: Some("15.00".parse().unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let commissions = storage.list_commissions_by_tenant(tenant.id).await.unwrap();
        assert_eq!(commissions.len(), 1);
        assert_eq!(
            commissions[0].commission_percentage,
            "10.00".parse::<Decimal>().unwrap()
        );
        assert_eq!(
            commissions[0].commission_amount,
            "10.00".parse::<Decimal>().unwrap()
        );
        let _ = bundle;
    }

    #[tokio::test]
    async fn payment_and_order_move_together() {
        let storage = MemoryStorage::new();
        let tenant_id = Uuid::new_v4();
        let order = order_fixture(tenant_id, "45.90".parse().unwrap(), Decimal::ZERO);
        let bundle = storage
            .create_order_with_transaction(
                order,
                vec![],
                Some(NewPayment {
                    provider_intent_id: Some("pi_123".into()),
                    amount: "45.90".parse().unwrap(),
                    status: PaymentStatus::Pending,
                    payment_method: Some("card".into()),
                }),
                None,
            )
            .await
            .unwrap();
        let payment = bundle.payment.unwrap();

        let (payment, order) = storage
            .update_payment_and_order_status(
                payment.id,
                PaymentStatus::Completed,
                bundle.order.id,
                OrderStatus::Confirmed,
            )
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(order.status, OrderStatus::Confirmed);

        // Unknown payment id leaves the order untouched.
        let err = storage
            .update_payment_and_order_status(
                Uuid::new_v4(),
                PaymentStatus::Failed,
                order.id,
                OrderStatus::Cancelled,
            )
            .await;
        assert!(matches!(err, Err(StorageError::NotFound(_))));
        let order = storage.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn only_one_assignment_may_be_accepted() {
        let storage = MemoryStorage::new();
        let order_id = Uuid::new_v4();
        let first = storage
            .create_driver_assignment(NewDriverAssignment {
                order_id,
                driver_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        let second = storage
            .create_driver_assignment(NewDriverAssignment {
                order_id,
                driver_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        storage
            .respond_to_assignment(first.id, AssignmentStatus::Accepted)
            .await
            .unwrap();
        let conflict = storage
            .respond_to_assignment(second.id, AssignmentStatus::Accepted)
            .await;
        assert!(matches!(conflict, Err(StorageError::Conflict(_))));
        storage
            .respond_to_assignment(second.id, AssignmentStatus::Rejected)
            .await
            .unwrap();
    }
}
