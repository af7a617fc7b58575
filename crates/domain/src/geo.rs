//! Great-circle distance and the duration/fee estimates derived from it.
//! These are the geometric fallbacks used whenever the external routing
//! provider is absent or unavailable.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Average speed assumed when the routing provider gives no duration.
pub const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Coarser speed for the delivery-time fallback path.
pub const FALLBACK_SPEED_KMH: f64 = 30.0;

/// Per-km surcharge on top of the base delivery rate.
pub const FEE_PER_KM_CENTS: i64 = 50;

pub fn default_base_rate() -> Decimal {
    Decimal::new(500, 2) // 5.00
}

/// Haversine distance in meters, rounded to the nearest meter.
/// Non-finite inputs are rejected by treating them as zero distance.
pub fn haversine_distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    if !(lat1.is_finite() && lng1.is_finite() && lat2.is_finite() && lng2.is_finite()) {
        return 0.0;
    }
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    (EARTH_RADIUS_M * c).round()
}

/// Travel time in whole seconds at the given average speed.
/// A non-positive or non-finite speed falls back to the default.
pub fn estimate_duration_secs(distance_m: f64, avg_speed_kmh: f64) -> u64 {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return 0;
    }
    let speed = if avg_speed_kmh.is_finite() && avg_speed_kmh > 0.0 {
        avg_speed_kmh
    } else {
        DEFAULT_SPEED_KMH
    };
    ((distance_m / 1000.0) / speed * 3600.0).ceil() as u64
}

/// ETA in whole minutes at the default dispatch speed, ceiling-rounded.
pub fn eta_minutes(distance_m: f64) -> u32 {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return 0;
    }
    (distance_m / 1000.0 / DEFAULT_SPEED_KMH * 60.0).ceil() as u32
}

/// Delivery fee: base rate plus 0.50 per km, rounded to 2 decimal places.
pub fn estimate_fee(distance_m: f64, base_rate: Decimal) -> Decimal {
    let meters = if distance_m.is_finite() && distance_m > 0.0 {
        distance_m
    } else {
        0.0
    };
    let km = Decimal::from_f64(meters / 1000.0).unwrap_or_default();
    (base_rate + km * Decimal::new(FEE_PER_KM_CENTS, 2)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let pairs = [
            (-23.5505, -46.6333, -22.9068, -43.1729),
            (0.0, 0.0, 10.0, 10.0),
            (51.5074, -0.1278, 48.8566, 2.3522),
        ];
        for (lat1, lng1, lat2, lng2) in pairs {
            let d1 = haversine_distance_m(lat1, lng1, lat2, lng2);
            let d2 = haversine_distance_m(lat2, lng2, lat1, lng1);
            assert_eq!(d1, d2);
        }
        assert_eq!(haversine_distance_m(-23.5505, -46.6333, -23.5505, -46.6333), 0.0);
    }

    #[test]
    fn distance_matches_known_reference() {
        // Sao Paulo center to Rio de Janeiro center is roughly 361 km.
        let d = haversine_distance_m(-23.5505, -46.6333, -22.9068, -43.1729);
        assert!((355_000.0..370_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn non_finite_inputs_are_clamped() {
        assert_eq!(haversine_distance_m(f64::NAN, 0.0, 1.0, 1.0), 0.0);
        assert_eq!(haversine_distance_m(0.0, f64::INFINITY, 1.0, 1.0), 0.0);
        assert_eq!(estimate_duration_secs(f64::NAN, 40.0), 0);
        assert_eq!(estimate_fee(f64::NAN, default_base_rate()), default_base_rate());
    }

    #[test]
    fn duration_uses_given_speed_with_default_fallback() {
        // 40 km at 40 km/h is exactly one hour.
        assert_eq!(estimate_duration_secs(40_000.0, 40.0), 3600);
        // 30 km/h fallback path.
        assert_eq!(estimate_duration_secs(30_000.0, FALLBACK_SPEED_KMH), 3600);
        // Bogus speed falls back to the default.
        assert_eq!(estimate_duration_secs(40_000.0, 0.0), 3600);
    }

    #[test]
    fn fee_formula_rounds_to_cents() {
        // 5.00 + 2.5 km * 0.50 = 6.25
        assert_eq!(
            estimate_fee(2_500.0, default_base_rate()),
            "6.25".parse::<Decimal>().unwrap()
        );
        // 3.00 base + 1.333 km * 0.50 = 3.6665 -> 3.67
        assert_eq!(
            estimate_fee(1_333.0, "3.00".parse().unwrap()),
            "3.67".parse::<Decimal>().unwrap()
        );
        assert_eq!(estimate_fee(0.0, default_base_rate()), default_base_rate());
    }

    #[test]
    fn eta_is_ceiling_rounded_minutes() {
        // 100 m at 40 km/h is 0.15 min, rounds up to 1.
        assert_eq!(eta_minutes(100.0), 1);
        // 5 km at 40 km/h is 7.5 min, rounds up to 8.
        assert_eq!(eta_minutes(5_000.0), 8);
    }
}
