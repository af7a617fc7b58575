//! Driver dispatch: nearest-driver selection, per-driver route
//! building, batch ETAs and delivery-fee estimates. Uses the routing
//! provider when one is configured and degrades to the Haversine
//! fallbacks otherwise; only missing coordinates are a hard error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use domain::geo;
use storage::{Storage, StorageError};

use crate::maps::MapsService;

#[derive(Debug)]
pub enum DispatchError {
    InvalidCoordinates,
    Storage(StorageError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidCoordinates => write!(f, "missing or non-finite coordinates"),
            DispatchError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        DispatchError::Storage(err)
    }
}

/// Last GPS fix reported by a driver app.
#[derive(Debug, Clone)]
pub struct DriverLocation {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Live driver positions, keyed by driver id. Constructed once and
/// injected wherever dispatch needs it; pings are last-write-wins per
/// driver.
#[derive(Default)]
pub struct DriverLocationRegistry {
    locations: RwLock<HashMap<Uuid, DriverLocation>>,
}

impl DriverLocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ping(
        &self,
        driver_id: Uuid,
        latitude: f64,
        longitude: f64,
        accuracy_m: Option<f64>,
    ) -> Result<DriverLocation, DispatchError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(DispatchError::InvalidCoordinates);
        }
        let location = DriverLocation {
            driver_id,
            latitude,
            longitude,
            accuracy_m,
            recorded_at: Utc::now(),
        };
        let mut map = self.locations.write().unwrap_or_else(|e| e.into_inner());
        map.insert(driver_id, location.clone());
        Ok(location)
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DriverLocation> {
        self.locations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&driver_id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<DriverLocation> {
        self.locations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_m: f64,
    pub eta_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStop {
    Restaurant,
    Customer,
}

#[derive(Debug, Clone)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub stop: RouteStop,
}

#[derive(Debug, Clone)]
pub struct OptimizedRoute {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub distance_m: f64,
    pub duration_secs: u64,
    pub eta: DateTime<Utc>,
    pub route: Vec<RoutePoint>,
}

#[derive(Debug, Clone)]
pub struct RouteOrder {
    pub order_id: Uuid,
    pub restaurant_lat: f64,
    pub restaurant_lng: f64,
    pub customer_lat: f64,
    pub customer_lng: f64,
}

#[derive(Debug, Clone)]
pub struct EtaOrder {
    pub order_id: Uuid,
    pub restaurant_lat: f64,
    pub restaurant_lng: f64,
    pub customer_lat: f64,
    pub customer_lng: f64,
    pub prep_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct OrderEta {
    pub eta: DateTime<Utc>,
    pub minutes: u32,
}

#[derive(Debug, Clone)]
pub struct AssignmentCandidate {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_m: f64,
}

pub struct DeliveryOptimizer {
    storage: Arc<dyn Storage>,
    maps: Option<MapsService>,
    locations: Arc<DriverLocationRegistry>,
}

impl DeliveryOptimizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        maps: Option<MapsService>,
        locations: Arc<DriverLocationRegistry>,
    ) -> Self {
        Self {
            storage,
            maps,
            locations,
        }
    }

    /// Available drivers with a GPS fix, sorted by straight-line
    /// distance to the target. Empty when nobody qualifies.
    pub async fn find_nearest_drivers(
        &self,
        latitude: f64,
        longitude: f64,
        _tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, DispatchError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(DispatchError::InvalidCoordinates);
        }
        let drivers = self.storage.list_available_drivers().await?;
        let mut nearby: Vec<NearbyDriver> = drivers
            .into_iter()
            .filter_map(|driver| {
                let (lat, lng) = (driver.current_latitude?, driver.current_longitude?);
                let distance_m = geo::haversine_distance_m(lat, lng, latitude, longitude);
                Some(NearbyDriver {
                    driver_id: driver.user_id,
                    latitude: lat,
                    longitude: lng,
                    distance_m,
                    eta_minutes: geo::eta_minutes(distance_m),
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        nearby.truncate(limit);
        Ok(nearby)
    }

    /// Two-leg restaurant-to-customer route per order. Router
    /// directions when available, Haversine at average speed otherwise.
    pub async fn optimize_route(
        &self,
        driver_id: Uuid,
        _driver_lat: f64,
        _driver_lng: f64,
        orders: Vec<RouteOrder>,
    ) -> Result<Vec<OptimizedRoute>, DispatchError> {
        let mut routes = Vec::with_capacity(orders.len());
        for order in orders {
            let coords = [
                order.restaurant_lat,
                order.restaurant_lng,
                order.customer_lat,
                order.customer_lng,
            ];
            if coords.iter().any(|c| !c.is_finite()) {
                return Err(DispatchError::InvalidCoordinates);
            }

            let directions = match &self.maps {
                Some(maps) => {
                    maps.directions(
                        order.restaurant_lat,
                        order.restaurant_lng,
                        order.customer_lat,
                        order.customer_lng,
                    )
                    .await
                }
                None => None,
            };
            let (distance_m, duration_secs) = match directions {
                Some(d) => (d.distance_m, d.duration_secs),
                None => {
                    let distance = geo::haversine_distance_m(
                        order.restaurant_lat,
                        order.restaurant_lng,
                        order.customer_lat,
                        order.customer_lng,
                    );
                    (
                        distance,
                        geo::estimate_duration_secs(distance, geo::DEFAULT_SPEED_KMH),
                    )
                }
            };

            routes.push(OptimizedRoute {
                order_id: order.order_id,
                driver_id,
                distance_m,
                duration_secs,
                eta: Utc::now() + Duration::seconds(duration_secs as i64),
                route: vec![
                    RoutePoint {
                        latitude: order.restaurant_lat,
                        longitude: order.restaurant_lng,
                        stop: RouteStop::Restaurant,
                    },
                    RoutePoint {
                        latitude: order.customer_lat,
                        longitude: order.customer_lng,
                        stop: RouteStop::Customer,
                    },
                ],
            });
        }
        Ok(routes)
    }

    /// Absolute ETA per order: prep time plus travel time, with the
    /// `prep + 30` fallback when no routing provider is configured.
    pub async fn calculate_multiple_etas(&self, orders: Vec<EtaOrder>) -> HashMap<Uuid, OrderEta> {
        let mut etas = HashMap::with_capacity(orders.len());
        for order in orders {
            let minutes = match &self.maps {
                Some(maps) => {
                    maps.estimate_delivery_time(
                        order.restaurant_lat,
                        order.restaurant_lng,
                        order.customer_lat,
                        order.customer_lng,
                        order.prep_minutes,
                    )
                    .await
                    .minutes
                }
                None => order.prep_minutes + 30,
            };
            etas.insert(
                order.order_id,
                OrderEta {
                    eta: Utc::now() + Duration::minutes(minutes as i64),
                    minutes,
                },
            );
        }
        etas
    }

    pub fn delivery_fee_estimate(&self, distance_m: f64, base_rate: Option<Decimal>) -> Decimal {
        let base = base_rate.unwrap_or_else(geo::default_base_rate);
        match &self.maps {
            Some(maps) => maps.calculate_delivery_fee(distance_m, base),
            None => geo::estimate_fee(distance_m, base),
        }
    }

    /// Strict nearest over the live location registry. `None` means no
    /// driver is currently reporting a position; callers surface that
    /// as "no drivers available" rather than guessing.
    pub fn auto_assign_candidate(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<AssignmentCandidate>, DispatchError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(DispatchError::InvalidCoordinates);
        }
        let candidate = self
            .locations
            .snapshot()
            .into_iter()
            .map(|location| AssignmentCandidate {
                driver_id: location.driver_id,
                latitude: location.latitude,
                longitude: location.longitude,
                distance_m: geo::haversine_distance_m(
                    latitude,
                    longitude,
                    location.latitude,
                    location.longitude,
                ),
            })
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DriverStatus, NewDriverProfile, NewUser, Role};
    use storage::MemoryStorage;

    /// Degrees of latitude that cover roughly the given meters.
    fn lat_offset_for_meters(meters: f64) -> f64 {
        meters / 111_320.0
    }

    async fn driver_at(
        storage: &MemoryStorage,
        email: &str,
        offset_m: Option<f64>,
    ) -> Uuid {
        let user = storage
            .create_user(NewUser {
                email: email.into(),
                password_hash: "x".into(),
                name: "Entregador".into(),
                phone: None,
                role: Role::Driver,
                tenant_id: None,
            })
            .await
            .unwrap();
        storage
            .create_driver_profile(NewDriverProfile {
                user_id: user.id,
                vehicle_type: Some("moto".into()),
                vehicle_plate: None,
            })
            .await
            .unwrap();
        storage
            .update_driver_status(user.id, DriverStatus::Available)
            .await
            .unwrap();
        if let Some(meters) = offset_m {
            storage
                .update_driver_location(user.id, lat_offset_for_meters(meters), 0.0)
                .await
                .unwrap();
        }
        user.id
    }

    #[tokio::test]
    async fn nearest_drivers_sorted_and_limited() {
        let storage = Arc::new(MemoryStorage::new());
        let far = driver_at(&storage, "far@d.com", Some(5_000.0)).await;
        let close = driver_at(&storage, "close@d.com", Some(100.0)).await;
        let closest = driver_at(&storage, "closest@d.com", Some(50.0)).await;
        // No GPS fix: must be excluded entirely.
        let no_fix = driver_at(&storage, "nofix@d.com", None).await;

        let optimizer = DeliveryOptimizer::new(
            storage.clone(),
            None,
            Arc::new(DriverLocationRegistry::new()),
        );
        let nearest = optimizer
            .find_nearest_drivers(0.0, 0.0, Uuid::new_v4(), 2)
            .await
            .unwrap();

        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].driver_id, closest);
        assert_eq!(nearest[1].driver_id, close);
        assert!(nearest.iter().all(|d| d.driver_id != far));
        assert!(nearest.iter().all(|d| d.driver_id != no_fix));
        assert!(nearest[0].eta_minutes >= 1);
    }

    #[tokio::test]
    async fn no_qualifying_drivers_is_empty_not_an_error() {
        let storage = Arc::new(MemoryStorage::new());
        driver_at(&storage, "offline@d.com", None).await;
        let optimizer = DeliveryOptimizer::new(
            storage,
            None,
            Arc::new(DriverLocationRegistry::new()),
        );
        let nearest = optimizer
            .find_nearest_drivers(-23.5, -46.6, Uuid::new_v4(), 5)
            .await
            .unwrap();
        assert!(nearest.is_empty());
    }

    #[tokio::test]
    async fn invalid_coordinates_are_a_hard_error() {
        let optimizer = DeliveryOptimizer::new(
            Arc::new(MemoryStorage::new()),
            None,
            Arc::new(DriverLocationRegistry::new()),
        );
        let err = optimizer
            .find_nearest_drivers(f64::NAN, 0.0, Uuid::new_v4(), 5)
            .await;
        assert!(matches!(err, Err(DispatchError::InvalidCoordinates)));
    }

    #[tokio::test]
    async fn route_fallback_uses_default_speed() {
        let optimizer = DeliveryOptimizer::new(
            Arc::new(MemoryStorage::new()),
            None,
            Arc::new(DriverLocationRegistry::new()),
        );
        let order_id = Uuid::new_v4();
        let routes = optimizer
            .optimize_route(
                Uuid::new_v4(),
                0.0,
                0.0,
                vec![RouteOrder {
                    order_id,
                    restaurant_lat: 0.0,
                    restaurant_lng: 0.0,
                    customer_lat: lat_offset_for_meters(40_000.0),
                    customer_lng: 0.0,
                }],
            )
            .await
            .unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].order_id, order_id);
        // Roughly 40 km at 40 km/h, about one hour.
        assert!((3_500..=3_700).contains(&(routes[0].duration_secs as i64)));
        assert_eq!(routes[0].route[0].stop, RouteStop::Restaurant);
        assert_eq!(routes[0].route[1].stop, RouteStop::Customer);
    }

    #[tokio::test]
    async fn eta_fallback_is_prep_plus_thirty() {
        let optimizer = DeliveryOptimizer::new(
            Arc::new(MemoryStorage::new()),
            None,
            Arc::new(DriverLocationRegistry::new()),
        );
        let order_id = Uuid::new_v4();
        let etas = optimizer
            .calculate_multiple_etas(vec![EtaOrder {
                order_id,
                restaurant_lat: -23.5,
                restaurant_lng: -46.6,
                customer_lat: -23.6,
                customer_lng: -46.7,
                prep_minutes: 15,
            }])
            .await;
        assert_eq!(etas[&order_id].minutes, 45);
    }

    #[test]
    fn registry_is_last_write_wins() {
        let registry = DriverLocationRegistry::new();
        let driver = Uuid::new_v4();
        registry.record_ping(driver, -23.5, -46.6, Some(10.0)).unwrap();
        registry.record_ping(driver, -23.6, -46.7, None).unwrap();
        let location = registry.get(driver).unwrap();
        assert_eq!(location.latitude, -23.6);
        assert_eq!(registry.snapshot().len(), 1);

        let err = registry.record_ping(driver, f64::NAN, 0.0, None);
        assert!(matches!(err, Err(DispatchError::InvalidCoordinates)));
    }

    #[tokio::test]
    async fn auto_assign_picks_strict_nearest_or_reports_none() {
        let registry = Arc::new(DriverLocationRegistry::new());
        let optimizer = DeliveryOptimizer::new(
            Arc::new(MemoryStorage::new()),
            None,
            registry.clone(),
        );

        assert!(optimizer.auto_assign_candidate(0.0, 0.0).unwrap().is_none());

        let far = Uuid::new_v4();
        let near = Uuid::new_v4();
        registry
            .record_ping(far, lat_offset_for_meters(3_000.0), 0.0, None)
            .unwrap();
        registry
            .record_ping(near, lat_offset_for_meters(200.0), 0.0, None)
            .unwrap();

        let candidate = optimizer.auto_assign_candidate(0.0, 0.0).unwrap().unwrap();
        assert_eq!(candidate.driver_id, near);
        assert!(candidate.distance_m < 300.0);
    }
}
