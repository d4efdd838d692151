use serde::{Deserialize, Serialize};

pub mod geocode;
pub mod route;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// 大圆距离（公里），haversine 公式
pub fn haversine(a: Point, b: Point) -> f64 {
    let dist_lat = (b.lat - a.lat).to_radians();
    let dist_lon = (b.lon - a.lon).to_radians();
    let h = (dist_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dist_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn haversine_identity_is_zero() {
        let p = Point::new(43.0245, 131.8927);
        assert_eq!(haversine(p, p), 0.0);
    }

    #[test]
    fn haversine_known_distance() {
        // 约 27 公里，远超 5 公里搜索半径
        let a = Point::new(43.00, 131.90);
        let b = Point::new(43.20, 132.10);
        let d = haversine(a, b);
        assert!(d > 25.0 && d < 30.0, "got {}", d);
    }

    #[test]
    fn haversine_short_hop() {
        let a = Point::new(43.0245, 131.8927);
        let b = Point::new(43.0345, 131.8927);
        let d = haversine(a, b);
        // 0.01 度纬度约 1.11 公里
        assert!((d - 1.11).abs() < 0.02, "got {}", d);
    }

    proptest! {
        #[test]
        fn haversine_is_symmetric(
            lat1 in -85.0f64..85.0, lon1 in -180.0f64..180.0,
            lat2 in -85.0f64..85.0, lon2 in -180.0f64..180.0,
        ) {
            let a = Point::new(lat1, lon1);
            let b = Point::new(lat2, lon2);
            let ab = haversine(a, b);
            let ba = haversine(b, a);
            prop_assert!((ab - ba).abs() < 1e-9);
            prop_assert!(ab >= 0.0);
        }
    }
}
