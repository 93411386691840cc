use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

const EARTH_RADIUS_KM: f64 = 6_371.0;

impl GeoPoint {
    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let half_dlat = (other.lat - self.lat).to_radians() / 2.0;
        let half_dlng = (other.lng - self.lng).to_radians() / 2.0;

        let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlng.sin().powi(2);
        2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CourierStatus {
    Available,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: CourierStatus,
    pub updated_at: DateTime<Utc>,
}

/// A courier a restaurant may request right now.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableCourier {
    #[serde(flatten)]
    pub courier: Courier,
    pub active_deliveries: usize,
    pub distance_km: f64,
}
