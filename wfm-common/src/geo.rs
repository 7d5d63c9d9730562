//! Geofence math
//!
//! Distances use the haversine formula on a spherical earth, which is well
//! inside the error of a phone GPS fix at geofence scales.

use serde::{Deserialize, Serialize};

/// Mean earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both components are finite and inside the WGS84 bounds
    pub fn is_valid(&self) -> bool {
        is_valid_latitude(self.latitude) && is_valid_longitude(self.longitude)
    }

    /// Great-circle distance to `other` in metres
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

pub fn is_valid_latitude(value: f64) -> bool {
    value.is_finite() && (-90.0..=90.0).contains(&value)
}

pub fn is_valid_longitude(value: f64) -> bool {
    value.is_finite() && (-180.0..=180.0).contains(&value)
}

/// Circular geofence with an accuracy threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub center: Coordinate,
    /// Radius in metres
    pub radius: f64,
    /// Worst GPS accuracy (metres) the fence accepts
    pub accuracy: f64,
}

impl Geofence {
    /// Distance from the fence centre if `point` lies inside the fence
    ///
    /// A fix whose reported accuracy is worse than the fence threshold never
    /// matches, even when its centre is inside the radius.
    pub fn matches(&self, point: &Coordinate, reported_accuracy: Option<f64>) -> Option<f64> {
        if let Some(accuracy) = reported_accuracy {
            if accuracy > self.accuracy {
                return None;
            }
        }
        let distance = self.center.distance_to(point);
        (distance <= self.radius).then_some(distance)
    }
}
