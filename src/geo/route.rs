use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::prelude::FromRow;
use thiserror::Error;

use crate::config::Config;
use crate::error::ServiceError;
use crate::geo::{Point, haversine};

// 缓存键坐标量化精度：1e-5 度，约 1 米
const CACHE_KEY_PRECISION: f64 = 1e5;

// 直线回退时假定 30 km/h 的行驶速度
const FALLBACK_MINUTES_PER_KM: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub polyline: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("routing request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("routing response malformed")]
    Malformed,
}

/// 外部路线规划服务
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, from: Point, to: Point) -> Result<RouteLeg, ProviderError>;
}

pub struct YandexRouter {
    http: Client,
    api_key: String,
    base_url: String,
}

impl YandexRouter {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            api_key: config.routing_api_key.clone(),
            base_url: config.routing_base_url.clone(),
        }
    }
}

#[async_trait]
impl RoutingProvider for YandexRouter {
    async fn route(&self, from: Point, to: Point) -> Result<RouteLeg, ProviderError> {
        let waypoints = format!("{},{}|{},{}", from.lon, from.lat, to.lon, to.lat);
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("waypoints", waypoints.as_str()),
                ("mode", "driving"),
                ("results", "1"),
            ])
            .send()
            .await?;

        let data: Value = resp.json().await?;
        parse_route_response(&data).ok_or(ProviderError::Malformed)
    }
}

// routes[0].distance 单位为米，duration 单位为秒
fn parse_route_response(data: &Value) -> Option<RouteLeg> {
    let route = data.get("routes")?.get(0)?;
    let distance_km = route.get("distance")?.as_f64()? / 1000.0;
    let duration_minutes = route.get("duration")?.as_f64()? / 60.0;
    let polyline = route
        .get("polyline")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Some(RouteLeg {
        distance_km,
        duration_minutes,
        polyline,
    })
}

/// 路线服务不可用时的直线估算
pub fn fallback_estimate(from: Point, to: Point) -> RouteLeg {
    let distance_km = haversine(from, to);
    RouteLeg {
        distance_km,
        duration_minutes: distance_km * FALLBACK_MINUTES_PER_KM,
        polyline: None,
    }
}

fn quantize(v: f64) -> f64 {
    (v * CACHE_KEY_PRECISION).round() / CACHE_KEY_PRECISION
}

fn quantize_point(p: Point) -> Point {
    Point::new(quantize(p.lat), quantize(p.lon))
}

#[derive(FromRow)]
struct RouteCacheRow {
    distance_km: f64,
    duration_minutes: f64,
    polyline: Option<String>,
}

/// 两点间路线估算：缓存 -> 外部服务 -> 直线回退。
/// 回退结果同样写入缓存；并发未命中可能产生重复行，属可接受冗余。
pub struct RouteEstimator {
    pool: PgPool,
    provider: Arc<dyn RoutingProvider>,
}

impl RouteEstimator {
    pub fn new(pool: PgPool, provider: Arc<dyn RoutingProvider>) -> Self {
        Self { pool, provider }
    }

    pub async fn estimate(&self, from: Point, to: Point) -> Result<RouteLeg, ServiceError> {
        let from = quantize_point(from);
        let to = quantize_point(to);

        let cached = sqlx::query_as::<_, RouteCacheRow>(
            r#"
            SELECT distance_km, duration_minutes, polyline
            FROM route_cache
            WHERE from_lat = $1 AND from_lon = $2 AND to_lat = $3 AND to_lon = $4
            LIMIT 1
            "#,
        )
        .bind(from.lat)
        .bind(from.lon)
        .bind(to.lat)
        .bind(to.lon)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = cached {
            tracing::debug!(
                "Route cache hit: ({}, {}) -> ({}, {})",
                from.lat,
                from.lon,
                to.lat,
                to.lon
            );
            return Ok(RouteLeg {
                distance_km: row.distance_km,
                duration_minutes: row.duration_minutes,
                polyline: row.polyline,
            });
        }

        let leg = match self.provider.route(from, to).await {
            Ok(leg) => leg,
            Err(e) => {
                tracing::warn!("Routing provider failed, falling back to haversine: {}", e);
                fallback_estimate(from, to)
            }
        };

        sqlx::query(
            r#"
            INSERT INTO route_cache
                (from_lat, from_lon, to_lat, to_lon, distance_km, duration_minutes, polyline, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(from.lat)
        .bind(from.lon)
        .bind(to.lat)
        .bind(to.lon)
        .bind(leg.distance_km)
        .bind(leg.duration_minutes)
        .bind(&leg.polyline)
        .execute(&self.pool)
        .await?;

        Ok(leg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fallback_duration_assumes_30_kmh() {
        let from = Point::new(43.0, 131.9);
        let to = Point::new(43.1, 132.0);
        let leg = fallback_estimate(from, to);
        let expected = haversine(from, to);
        assert_eq!(leg.distance_km, expected);
        assert_eq!(leg.duration_minutes, expected * 2.0);
        assert!(leg.polyline.is_none());
    }

    #[test]
    fn quantize_rounds_to_five_decimals() {
        assert_eq!(quantize(43.024_511_9), 43.024_51);
        assert_eq!(quantize(-131.892_749_9), -131.892_75);
        // 同一街区内的微小差异映射到同一个缓存键
        let a = quantize_point(Point::new(43.024_500_1, 131.892_700_4));
        let b = quantize_point(Point::new(43.024_499_8, 131.892_699_7));
        assert_eq!(a, b);
    }

    #[test]
    fn parses_routing_response() {
        let data = json!({
            "routes": [{
                "distance": 12500.0,
                "duration": 900.0,
                "polyline": "abc123"
            }]
        });
        let leg = parse_route_response(&data).unwrap();
        assert_eq!(leg.distance_km, 12.5);
        assert_eq!(leg.duration_minutes, 15.0);
        assert_eq!(leg.polyline.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_routes_is_malformed() {
        let data = json!({ "error": "quota exceeded" });
        assert!(parse_route_response(&data).is_none());
    }
}
