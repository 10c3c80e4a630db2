//! Geometry primitives shared by the session stores and the operations.
//!
//! Coordinates are WGS84 degrees. A [`Bbox`] is always
//! `[min_lng, min_lat, max_lng, max_lat]` once it has been built through
//! [`Bbox::from_corners`] or [`Bbox::normalized`].

use serde::{Deserialize, Serialize};

pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lng.is_finite() && self.lat.is_finite()
    }

    /// Human-readable `"lat, lng"` label used for single-point highlights.
    pub fn coordinate_label(&self) -> String {
        format!("{:.5}, {:.5}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bbox(pub [f64; 4]);

impl Bbox {
    /// Builds a bbox from two arbitrary corners, ordering min/max per axis.
    pub fn from_corners(a: LngLat, b: LngLat) -> Self {
        Bbox([
            a.lng.min(b.lng),
            a.lat.min(b.lat),
            a.lng.max(b.lng),
            a.lat.max(b.lat),
        ])
    }

    /// Square box of `half_size` degrees around `center`.
    pub fn around(center: LngLat, half_size: f64) -> Self {
        Bbox([
            center.lng - half_size,
            center.lat - half_size,
            center.lng + half_size,
            center.lat + half_size,
        ])
    }

    pub fn from_point(p: LngLat) -> Self {
        Bbox([p.lng, p.lat, p.lng, p.lat])
    }

    pub fn normalized(&self) -> Self {
        Self::from_corners(
            LngLat::new(self.0[0], self.0[1]),
            LngLat::new(self.0[2], self.0[3]),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        let a = self.normalized();
        let b = other.normalized();
        Bbox([
            a.0[0].min(b.0[0]),
            a.0[1].min(b.0[1]),
            a.0[2].max(b.0[2]),
            a.0[3].max(b.0[3]),
        ])
    }

    pub fn center(&self) -> LngLat {
        LngLat::new((self.0[0] + self.0[2]) / 2.0, (self.0[1] + self.0[3]) / 2.0)
    }

    /// Largest of the longitude and latitude extents, in degrees.
    pub fn span(&self) -> f64 {
        let n = self.normalized();
        (n.0[2] - n.0[0]).max(n.0[3] - n.0[1])
    }

    pub fn contains(&self, p: LngLat) -> bool {
        let n = self.normalized();
        n.0[0] <= p.lng && p.lng <= n.0[2] && n.0[1] <= p.lat && p.lat <= n.0[3]
    }
}

pub fn clamp_longitude(lng: f64) -> f64 {
    lng.clamp(MIN_LONGITUDE, MAX_LONGITUDE)
}

pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(MIN_LATITUDE, MAX_LATITUDE)
}

/// Great-circle distance in metres.
pub fn haversine_m(a: LngLat, b: LngLat) -> f64 {
    let (lng1, lat1) = (a.lng.to_radians(), a.lat.to_radians());
    let (lng2, lat2) = (b.lng.to_radians(), b.lat.to_radians());
    let dlng = lng2 - lng1;
    let dlat = lat2 - lat1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().asin() * EARTH_RADIUS_M
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_orders_each_axis() {
        let bbox = Bbox::from_corners(LngLat::new(-122.40, 37.80), LngLat::new(-122.45, 37.77));
        assert_eq!(bbox, Bbox([-122.45, 37.77, -122.40, 37.80]));
        assert_eq!(bbox, bbox.normalized());
    }

    #[test]
    fn union_covers_both_boxes() {
        let a = Bbox([-122.46, 37.70, -122.45, 37.71]);
        let b = Bbox::from_point(LngLat::new(-122.44, 37.75));
        let u = a.union(&b);
        assert_eq!(u, Bbox([-122.46, 37.70, -122.44, 37.75]));
        assert!((u.span() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn around_point_is_centered() {
        let p = LngLat::new(-122.4, 37.7);
        let bbox = Bbox::around(p, 0.003);
        let c = bbox.center();
        assert!((c.lng - p.lng).abs() < 1e-12);
        assert!((c.lat - p.lat).abs() < 1e-12);
        assert!(bbox.contains(p));
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Ferry Building to Coit Tower is roughly 1.3 km.
        let d = haversine_m(LngLat::new(-122.3937, 37.7955), LngLat::new(-122.4058, 37.8024));
        assert!(d > 1000.0 && d < 1400.0, "distance was {}", d);
        assert_eq!(haversine_m(LngLat::new(1.0, 2.0), LngLat::new(1.0, 2.0)), 0.0);
    }

    #[test]
    fn coordinate_label_is_lat_first() {
        assert_eq!(LngLat::new(-122.4194, 37.7749).coordinate_label(), "37.77490, -122.41940");
    }
}
