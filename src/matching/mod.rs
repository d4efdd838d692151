use std::cmp::Ordering;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::geo::route::RouteEstimator;
use crate::geo::{Point, haversine};
use crate::routes::trip::model::{Trip, TripType};

// 相关性权重：距离为主，绕行时间为辅
const DISTANCE_WEIGHT: f64 = 0.7;
const DEVIATION_WEIGHT: f64 = 0.3;

/// 排序引擎对路线时长的唯一依赖，便于用桩测试
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn duration_minutes(&self, from: Point, to: Point) -> Result<f64, ServiceError>;
}

#[async_trait]
impl RouteSource for RouteEstimator {
    async fn duration_minutes(&self, from: Point, to: Point) -> Result<f64, ServiceError> {
        Ok(self.estimate(from, to).await?.duration_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct RankRequest {
    pub passenger: Point,
    pub trip_type: TripType,
    pub campus: Point,
    pub max_distance_km: f64,
    pub max_deviation_minutes: f64,
}

#[derive(Debug)]
pub struct ScoredTrip {
    pub trip: Trip,
    pub distance_km: f64,
    pub deviation_minutes: f64,
}

impl ScoredTrip {
    pub fn score(&self) -> f64 {
        DISTANCE_WEIGHT * self.distance_km + DEVIATION_WEIGHT * self.deviation_minutes
    }
}

/// 候选行程过滤与排序。
///
/// from_campus 行程的绕行成本 = (校区->乘客 + 乘客->目的地) - (校区->目的地)；
/// to_campus 方向暂不建模接人绕行，绕行恒为 0（刻意保留的不对称）。
/// 得分越低越靠前，同分保持候选顺序（稳定排序保证结果确定）。
pub async fn rank(
    req: &RankRequest,
    candidates: Vec<Trip>,
    routes: &dyn RouteSource,
) -> Result<Vec<ScoredTrip>, ServiceError> {
    let mut scored = Vec::new();

    for trip in candidates {
        // 未成功地理编码的行程视为无限远
        let Some(destination) = trip.destination() else {
            continue;
        };

        let distance_km = haversine(req.passenger, destination);
        if distance_km > req.max_distance_km {
            continue;
        }

        let deviation_minutes = match req.trip_type {
            TripType::FromCampus => {
                let direct = routes.duration_minutes(req.campus, destination).await?;
                let to_passenger = routes.duration_minutes(req.campus, req.passenger).await?;
                let to_destination = routes
                    .duration_minutes(req.passenger, destination)
                    .await?;
                to_passenger + to_destination - direct
            }
            TripType::ToCampus => 0.0,
        };

        if deviation_minutes > req.max_deviation_minutes {
            continue;
        }

        scored.push(ScoredTrip {
            distance_km: (distance_km * 10.0).round() / 10.0,
            deviation_minutes: deviation_minutes.round(),
            trip,
        });
    }

    scored.sort_by(|a, b| a.score().partial_cmp(&b.score()).unwrap_or(Ordering::Equal));
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::trip::model::TripStatus;
    use chrono::Utc;

    struct StubRoutes {
        legs: Vec<(Point, Point, f64)>,
    }

    impl StubRoutes {
        fn empty() -> Self {
            Self { legs: Vec::new() }
        }
    }

    fn close(a: Point, b: Point) -> bool {
        (a.lat - b.lat).abs() < 1e-6 && (a.lon - b.lon).abs() < 1e-6
    }

    #[async_trait]
    impl RouteSource for StubRoutes {
        async fn duration_minutes(&self, from: Point, to: Point) -> Result<f64, ServiceError> {
            self.legs
                .iter()
                .find(|(f, t, _)| close(*f, from) && close(*t, to))
                .map(|(_, _, d)| *d)
                .ok_or_else(|| {
                    ServiceError::Upstream(format!("no stub leg {:?} -> {:?}", from, to))
                })
        }
    }

    fn trip(id: &str, trip_type: TripType, destination: Option<Point>) -> Trip {
        Trip {
            trip_id: id.into(),
            driver_id: "driver".into(),
            trip_type,
            point: "точка".into(),
            point_lat: destination.map(|p| p.lat),
            point_lon: destination.map(|p| p.lon),
            departure_time: Utc::now() + chrono::Duration::hours(1),
            seats_total: 4,
            seats_available: 4,
            price: 100,
            comment: None,
            status: TripStatus::Active,
            max_deviation_km: 3,
            time_flexibility_minutes: 30,
            created_at: Utc::now(),
        }
    }

    fn to_campus_request(passenger: Point, max_distance_km: f64) -> RankRequest {
        RankRequest {
            passenger,
            trip_type: TripType::ToCampus,
            campus: Point::new(43.0245, 131.8927),
            max_distance_km,
            max_deviation_minutes: 30.0,
        }
    }

    #[tokio::test]
    async fn excludes_candidates_beyond_max_distance() {
        let passenger = Point::new(43.00, 131.90);
        // 约 27 公里外
        let far = trip("far", TripType::ToCampus, Some(Point::new(43.20, 132.10)));
        let near = trip("near", TripType::ToCampus, Some(Point::new(43.01, 131.91)));

        let req = to_campus_request(passenger, 5.0);
        let ranked = rank(&req, vec![far, near], &StubRoutes::empty())
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].trip.trip_id, "near");
    }

    #[tokio::test]
    async fn excludes_candidates_without_coordinates() {
        let passenger = Point::new(43.00, 131.90);
        let no_coords = trip("blank", TripType::ToCampus, None);
        let ok = trip("ok", TripType::ToCampus, Some(Point::new(43.01, 131.91)));

        let req = to_campus_request(passenger, 5.0);
        let ranked = rank(&req, vec![no_coords, ok], &StubRoutes::empty())
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].trip.trip_id, "ok");
    }

    #[tokio::test]
    async fn to_campus_deviation_is_always_zero() {
        let passenger = Point::new(43.00, 131.90);
        let t = trip("t", TripType::ToCampus, Some(Point::new(43.01, 131.91)));

        // 桩里没有任何路线：to_campus 不应触发路线查询
        let req = to_campus_request(passenger, 5.0);
        let ranked = rank(&req, vec![t], &StubRoutes::empty()).await.unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].deviation_minutes, 0.0);
    }

    #[tokio::test]
    async fn from_campus_deviation_cutoff() {
        let campus = Point::new(43.0245, 131.8927);
        let passenger = Point::new(43.05, 131.93);
        let destination = Point::new(43.08, 131.96);

        let routes = StubRoutes {
            legs: vec![
                (campus, destination, 10.0),
                (campus, passenger, 8.0),
                (passenger, destination, 12.0),
            ],
        };
        // 绕行 = 8 + 12 - 10 = 10 分钟
        let t = trip("t", TripType::FromCampus, Some(destination));

        let mut req = RankRequest {
            passenger,
            trip_type: TripType::FromCampus,
            campus,
            max_distance_km: 50.0,
            max_deviation_minutes: 5.0,
        };
        let ranked = rank(&req, vec![trip("t", TripType::FromCampus, Some(destination))], &routes)
            .await
            .unwrap();
        assert!(ranked.is_empty());

        req.max_deviation_minutes = 15.0;
        let ranked = rank(&req, vec![t], &routes).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].deviation_minutes, 10.0);
    }

    #[tokio::test]
    async fn orders_by_weighted_score() {
        let passenger = Point::new(43.00, 131.90);
        // 距离近似 1.1 / 3.3 / 2.2 公里
        let near = trip("near", TripType::ToCampus, Some(Point::new(43.01, 131.90)));
        let far = trip("far", TripType::ToCampus, Some(Point::new(43.03, 131.90)));
        let mid = trip("mid", TripType::ToCampus, Some(Point::new(43.02, 131.90)));

        let req = to_campus_request(passenger, 10.0);
        let ranked = rank(&req, vec![far, near, mid], &StubRoutes::empty())
            .await
            .unwrap();

        let order: Vec<&str> = ranked.iter().map(|s| s.trip.trip_id.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn equal_scores_keep_candidate_order() {
        let passenger = Point::new(43.00, 131.90);
        let dest = Point::new(43.01, 131.91);
        let first = trip("first", TripType::ToCampus, Some(dest));
        let second = trip("second", TripType::ToCampus, Some(dest));

        let req = to_campus_request(passenger, 5.0);
        let ranked = rank(&req, vec![first, second], &StubRoutes::empty())
            .await
            .unwrap();

        let order: Vec<&str> = ranked.iter().map(|s| s.trip.trip_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn distance_is_rounded_to_one_decimal() {
        let passenger = Point::new(43.00, 131.90);
        let t = trip("t", TripType::ToCampus, Some(Point::new(43.013, 131.912)));

        let req = to_campus_request(passenger, 5.0);
        let ranked = rank(&req, vec![t], &StubRoutes::empty()).await.unwrap();

        assert_eq!(ranked.len(), 1);
        let d = ranked[0].distance_km;
        assert_eq!((d * 10.0).round() / 10.0, d);
    }
}
