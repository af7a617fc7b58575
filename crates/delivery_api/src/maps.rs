//! Routing provider client (OSRM for routing, Nominatim for
//! geocoding; both keyless OpenStreetMap services). The whole service
//! is optional and every consumer has a geometric fallback, so an
//! unreachable router slows nothing down beyond its bounded timeout.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use domain::geo;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Directions {
    pub distance_m: f64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MatrixEntry {
    pub distance_m: f64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Geocoded {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryEstimate {
    pub minutes: u32,
    pub distance_m: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    #[serde(default)]
    durations: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    distances: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
}

pub struct MapsService {
    client: reqwest::Client,
    router_url: String,
    geocoder_url: String,
}

impl MapsService {
    /// Configured through `OSRM_BASE_URL`; absent means no routing
    /// provider and callers use the Haversine fallbacks throughout.
    pub fn from_env() -> Option<Self> {
        let router_url = std::env::var("OSRM_BASE_URL").ok()?;
        if router_url.is_empty() {
            return None;
        }
        let geocoder_url = std::env::var("NOMINATIM_BASE_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());
        Some(Self::new(router_url, geocoder_url))
    }

    pub fn new(router_url: String, geocoder_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            router_url,
            geocoder_url,
        }
    }

    /// Driving directions between two points. Any failure (timeout,
    /// bad status, malformed body) is logged and reported as `None`;
    /// the caller falls back to the geometric estimate.
    pub async fn directions(
        &self,
        from_lat: f64,
        from_lng: f64,
        to_lat: f64,
        to_lng: f64,
    ) -> Option<Directions> {
        // OSRM takes lng,lat pairs.
        let url = format!(
            "{}/route/v1/driving/{from_lng},{from_lat};{to_lng},{to_lat}",
            self.router_url
        );
        let response = self
            .client
            .get(&url)
            .query(&[("overview", "false"), ("steps", "false")])
            .send()
            .await;
        let body: OsrmRouteResponse = match response {
            Ok(res) => match res.json().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "malformed routing response");
                    return None;
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "routing provider unavailable");
                return None;
            }
        };
        if body.code != "Ok" {
            tracing::warn!(code = body.code, "routing provider rejected request");
            return None;
        }
        let route = body.routes.first()?;
        Some(Directions {
            distance_m: route.distance,
            duration_secs: route.duration.round().max(0.0) as u64,
        })
    }

    /// One origin to many destinations. Entries the router could not
    /// reach fall back to the Haversine estimate so the result always
    /// lines up with `destinations`.
    pub async fn distance_matrix(
        &self,
        origin: (f64, f64),
        destinations: &[(f64, f64)],
    ) -> Option<Vec<MatrixEntry>> {
        if destinations.is_empty() {
            return Some(Vec::new());
        }
        let mut coords = format!("{},{}", origin.1, origin.0);
        for (lat, lng) in destinations {
            coords.push_str(&format!(";{lng},{lat}"));
        }
        let url = format!("{}/table/v1/driving/{coords}", self.router_url);
        let response = self
            .client
            .get(&url)
            .query(&[("annotations", "duration,distance"), ("sources", "0")])
            .send()
            .await;
        let body: OsrmTableResponse = match response {
            Ok(res) => res.json().await.ok()?,
            Err(err) => {
                tracing::warn!(error = %err, "matrix request failed");
                return None;
            }
        };
        if body.code != "Ok" {
            return None;
        }
        let durations = body.durations.first()?;
        let distances = body.distances.first();
        let entries = destinations
            .iter()
            .enumerate()
            .map(|(i, (lat, lng))| {
                let fallback_distance =
                    geo::haversine_distance_m(origin.0, origin.1, *lat, *lng);
                let distance_m = distances
                    .and_then(|row| row.get(i + 1).copied().flatten())
                    .unwrap_or(fallback_distance);
                let duration_secs = durations
                    .get(i + 1)
                    .copied()
                    .flatten()
                    .map(|d| d.round().max(0.0) as u64)
                    .unwrap_or_else(|| {
                        geo::estimate_duration_secs(distance_m, geo::DEFAULT_SPEED_KMH)
                    });
                MatrixEntry {
                    distance_m,
                    duration_secs,
                }
            })
            .collect();
        Some(entries)
    }

    pub async fn geocode(&self, address: &str) -> Option<Geocoded> {
        let url = format!("{}/search", self.geocoder_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .header("User-Agent", "delivery-platform/0.1")
            .send()
            .await;
        let places: Vec<NominatimPlace> = match response {
            Ok(res) => res.json().await.ok()?,
            Err(err) => {
                tracing::warn!(error = %err, "geocoding request failed");
                return None;
            }
        };
        let place = places.into_iter().next()?;
        Some(Geocoded {
            latitude: place.lat.parse().ok()?,
            longitude: place.lon.parse().ok()?,
            formatted_address: place.display_name,
        })
    }

    /// Prep time plus travel time. Never fails: when the router is
    /// unreachable the coarser 30 km/h fallback applies.
    pub async fn estimate_delivery_time(
        &self,
        restaurant_lat: f64,
        restaurant_lng: f64,
        customer_lat: f64,
        customer_lng: f64,
        prep_minutes: u32,
    ) -> DeliveryEstimate {
        let distance_m =
            geo::haversine_distance_m(restaurant_lat, restaurant_lng, customer_lat, customer_lng);
        let delivery_minutes = match self
            .directions(restaurant_lat, restaurant_lng, customer_lat, customer_lng)
            .await
        {
            Some(directions) => (directions.duration_secs as f64 / 60.0).ceil() as u32,
            None => {
                (geo::estimate_duration_secs(distance_m, geo::FALLBACK_SPEED_KMH) as f64 / 60.0)
                    .ceil() as u32
            }
        };
        DeliveryEstimate {
            minutes: prep_minutes + delivery_minutes,
            distance_m,
        }
    }

    pub fn calculate_delivery_fee(&self, distance_m: f64, base_rate: Decimal) -> Decimal {
        geo::estimate_fee(distance_m, base_rate)
    }
}
