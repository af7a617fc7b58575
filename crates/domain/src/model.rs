//! Core entities shared by the storage layer and the API crate.
//! Field inventory mirrors the relational schema; money is always
//! fixed-point `Decimal`, coordinates are plain f64 degrees.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    RestaurantOwner,
    Driver,
    PlatformAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::RestaurantOwner => "restaurant_owner",
            Role::Driver => "driver",
            Role::PlatformAdmin => "platform_admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "restaurant_owner" => Ok(Role::RestaurantOwner),
            "driver" => Ok(Role::Driver),
            "platform_admin" => Ok(Role::PlatformAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Order lifecycle vocabulary. Orders are created once and only move
/// through these states; they are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Preparing => 2,
            OrderStatus::Ready => 3,
            OrderStatus::OutForDelivery => 4,
            OrderStatus::Delivered => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    /// Forward-only progression. Cancellation is allowed from any
    /// non-terminal state; external platforms may skip intermediate
    /// states (e.g. a `delivered` event arriving for a `confirmed`
    /// order), so any strictly-forward move is valid.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        if next == OrderStatus::Cancelled {
            return true;
        }
        next.rank() > self.rank() && next != OrderStatus::Cancelled
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
            DriverStatus::Offline => "offline",
        }
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(DriverStatus::Available),
            "busy" => Ok(DriverStatus::Busy),
            "offline" => Ok(DriverStatus::Offline),
            other => Err(format!("unknown driver status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssignmentStatus::Pending),
            "accepted" => Ok(AssignmentStatus::Accepted),
            "rejected" => Ok(AssignmentStatus::Rejected),
            other => Err(format!("unknown assignment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Delivery,
    Pickup,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::Delivery => "delivery",
            DeliveryType::Pickup => "pickup",
        }
    }
}

impl FromStr for DeliveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(DeliveryType::Delivery),
            "pickup" => Ok(DeliveryType::Pickup),
            other => Err(format!("unknown delivery type: {other}")),
        }
    }
}

/// Third-party marketplace that can push orders in via webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPlatform {
    Ifood,
    UberEats,
    QueroDelivery,
    Generic,
}

impl ExternalPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalPlatform::Ifood => "ifood",
            ExternalPlatform::UberEats => "ubereats",
            ExternalPlatform::QueroDelivery => "quero_delivery",
            ExternalPlatform::Generic => "generic",
        }
    }

    /// Placeholder customer name when the payload carries none.
    pub fn placeholder_customer_name(&self) -> &'static str {
        match self {
            ExternalPlatform::Ifood => "Cliente iFood",
            ExternalPlatform::UberEats => "Cliente Uber Eats",
            ExternalPlatform::QueroDelivery => "Cliente Quero Delivery",
            ExternalPlatform::Generic => "Cliente",
        }
    }
}

impl FromStr for ExternalPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ifood" => Ok(ExternalPlatform::Ifood),
            "ubereats" | "uber_eats" => Ok(ExternalPlatform::UberEats),
            "quero_delivery" | "quero" => Ok(ExternalPlatform::QueroDelivery),
            "generic" => Ok(ExternalPlatform::Generic),
            other => Err(format!("unknown external platform: {other}")),
        }
    }
}

impl fmt::Display for ExternalPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: String,
    pub close: String,
    pub closed: bool,
}

impl DayHours {
    fn new(open: &str, close: &str) -> Self {
        Self {
            open: open.to_string(),
            close: close.to_string(),
            closed: false,
        }
    }
}

/// Per-weekday opening hours, stored as a JSON column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub monday: DayHours,
    pub tuesday: DayHours,
    pub wednesday: DayHours,
    pub thursday: DayHours,
    pub friday: DayHours,
    pub saturday: DayHours,
    pub sunday: DayHours,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            monday: DayHours::new("10:00", "23:00"),
            tuesday: DayHours::new("10:00", "23:00"),
            wednesday: DayHours::new("10:00", "23:00"),
            thursday: DayHours::new("10:00", "23:00"),
            friday: DayHours::new("10:00", "23:00"),
            saturday: DayHours::new("10:00", "23:00"),
            sunday: DayHours::new("11:00", "22:00"),
        }
    }
}

/// A restaurant account on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    /// Direct percentage, e.g. 10.00 means 10%.
    pub commission_percentage: Decimal,
    pub delivery_fee_business: Decimal,
    pub delivery_fee_customer: Decimal,
    pub operating_hours: OperatingHours,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub commission_percentage: Decimal,
    pub delivery_fee_business: Decimal,
    pub delivery_fee_customer: Decimal,
    pub operating_hours: Option<OperatingHours>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
    pub commission_percentage: Option<Decimal>,
    pub delivery_fee_business: Option<Decimal>,
    pub delivery_fee_customer: Option<Decimal>,
    pub operating_hours: Option<OperatingHours>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    /// Required for restaurant owners, optional otherwise.
    pub tenant_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub default_address: Option<String>,
    pub address_latitude: Option<f64>,
    pub address_longitude: Option<f64>,
    pub address_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomerProfile {
    pub user_id: Uuid,
    pub default_address: Option<String>,
    pub address_latitude: Option<f64>,
    pub address_longitude: Option<f64>,
    pub address_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vehicle_type: Option<String>,
    pub vehicle_plate: Option<String>,
    pub status: DriverStatus,
    /// Null until the first GPS ping; dispatch skips drivers without a fix.
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub rating: Option<Decimal>,
    pub total_deliveries: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDriverProfile {
    pub user_id: Uuid,
    pub vehicle_type: Option<String>,
    pub vehicle_plate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub display_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub display_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub is_available: bool,
    /// Optional per-size price map (e.g. "pequena"/"media"/"grande").
    pub prices_by_size: Option<HashMap<String, Decimal>>,
    /// Pizza-style multi-flavor item.
    pub is_combination: bool,
    pub max_flavors: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub tenant_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub prices_by_size: Option<HashMap<String, Decimal>>,
    pub is_combination: bool,
    pub max_flavors: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_available: Option<bool>,
    pub prices_by_size: Option<HashMap<String, Decimal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PizzaFlavor {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPizzaFlavor {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Absent for guest checkout and platform-sourced orders.
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub delivery_address: Option<String>,
    pub address_latitude: Option<f64>,
    pub address_longitude: Option<f64>,
    pub order_notes: Option<String>,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    /// Always subtotal + delivery_fee at creation time; never re-derived.
    pub total: Decimal,
    pub driver_id: Option<Uuid>,
    pub delivery_type: DeliveryType,
    pub payment_method: String,
    pub external_platform: Option<ExternalPlatform>,
    /// De-duplication key together with tenant and platform.
    pub external_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub tenant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub delivery_address: Option<String>,
    pub address_latitude: Option<f64>,
    pub address_longitude: Option<f64>,
    pub order_notes: Option<String>,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub delivery_type: DeliveryType,
    pub payment_method: String,
    pub external_platform: Option<ExternalPlatform>,
    pub external_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    /// None for externally-sourced items with no local product mapping.
    pub product_id: Option<Uuid>,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Option<Uuid>,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_intent_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub provider_intent_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
}

/// Commission snapshot for one order. Percentage and amount are captured
/// at creation time; later tenant rate changes never touch existing rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub order_total: Decimal,
    pub commission_percentage: Decimal,
    pub commission_amount: Decimal,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommission {
    pub tenant_id: Uuid,
    pub order_total: Decimal,
    pub commission_percentage: Decimal,
    pub commission_amount: Decimal,
}

impl NewCommission {
    /// Snapshot a tenant's current rate against an order total.
    /// Amount is total * pct / 100, rounded to 2 dp.
    pub fn snapshot(tenant_id: Uuid, order_total: Decimal, percentage: Decimal) -> Self {
        let amount = (order_total * percentage / Decimal::new(100, 0)).round_dp(2);
        Self {
            tenant_id,
            order_total,
            commission_percentage: percentage,
            commission_amount: amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: AssignmentStatus,
    pub notified_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDriverAssignment {
    pub order_id: Uuid,
    pub driver_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub stars: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRating {
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub stars: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub discount_percentage: Decimal,
    pub is_active: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPromotion {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub discount_percentage: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_forward_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Preparing));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Ready.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Preparing.can_transition_to(OrderStatus::Preparing));
    }

    #[test]
    fn order_status_cancellation_rules() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Confirmed));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn commission_snapshot_rounds_to_cents() {
        let c = NewCommission::snapshot(
            Uuid::new_v4(),
            "45.90".parse().unwrap(),
            "10.00".parse().unwrap(),
        );
        assert_eq!(c.commission_amount, "4.59".parse::<Decimal>().unwrap());

        let c = NewCommission::snapshot(
            Uuid::new_v4(),
            "19.99".parse().unwrap(),
            "12.50".parse().unwrap(),
        );
        assert_eq!(c.commission_amount, "2.50".parse::<Decimal>().unwrap());
    }
}
