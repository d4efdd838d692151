use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::geo::Point;
use crate::routes::user::model::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    ToCampus,
    FromCampus,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::ToCampus => "to_campus",
            TripType::FromCampus => "from_campus",
        }
    }
}

impl TryFrom<String> for TripType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "to_campus" => Ok(TripType::ToCampus),
            "from_campus" => Ok(TripType::FromCampus),
            other => Err(format!("unknown trip type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    InProgress,
    Filled,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::InProgress => "in_progress",
            TripStatus::Filled => "filled",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<String> for TripStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(TripStatus::Active),
            "in_progress" => Ok(TripStatus::InProgress),
            "filled" => Ok(TripStatus::Filled),
            "completed" => Ok(TripStatus::Completed),
            "cancelled" => Ok(TripStatus::Cancelled),
            other => Err(format!("unknown trip status: {other}")),
        }
    }
}

/// 行程状态机：司机可触发的状态迁移
pub fn trip_transition_allowed(from: TripStatus, to: TripStatus) -> bool {
    use TripStatus::*;
    matches!(
        (from, to),
        (Active | Filled, InProgress)
            | (InProgress, Completed)
            | (Active | Filled | InProgress, Cancelled)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub trip_id: String,
    pub driver_id: String,
    #[sqlx(try_from = "String")]
    pub trip_type: TripType,
    pub point: String,
    pub point_lat: Option<f64>,
    pub point_lon: Option<f64>,
    pub departure_time: DateTime<Utc>,
    pub seats_total: i32,
    pub seats_available: i32,
    pub price: i32,
    pub comment: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: TripStatus,
    pub max_deviation_km: i32,
    pub time_flexibility_minutes: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub trip_type: TripType,
    pub point: String,
    pub point_lat: Option<f64>,
    pub point_lon: Option<f64>,
    pub departure_time: DateTime<Utc>,
    pub seats_total: i32,
    pub price: i32,
    pub comment: Option<String>,
    #[serde(default = "default_max_deviation_km")]
    pub max_deviation_km: i32,
    #[serde(default = "default_time_flexibility")]
    pub time_flexibility_minutes: i32,
}

fn default_max_deviation_km() -> i32 {
    3
}

fn default_time_flexibility() -> i32 {
    30
}

impl CreateTripRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if !(1..=8).contains(&self.seats_total) {
            return Err(ServiceError::Validation("座位数必须在 1 到 8 之间".into()));
        }
        if self.price < 0 {
            return Err(ServiceError::Validation("价格不能为负".into()));
        }
        if !(0..=20).contains(&self.max_deviation_km) {
            return Err(ServiceError::Validation(
                "绕行距离必须在 0 到 20 公里之间".into(),
            ));
        }
        if self.time_flexibility_minutes < 0 {
            return Err(ServiceError::Validation("时间弹性不能为负".into()));
        }
        if self.point.trim().is_empty() {
            return Err(ServiceError::Validation("目的地不能为空".into()));
        }
        if self.departure_time <= Utc::now() {
            return Err(ServiceError::Validation("出发时间必须在将来".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TripInfo {
    #[serde(flatten)]
    pub trip: Trip,
    pub driver: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTripStatusRequest {
    pub status: TripStatus,
}

// 行程详情缓存；行程被预订/状态变更时删除
const TRIP_CACHE_EXPIRE: u64 = 60;
const TRIP_CACHE_PREFIX: &str = "trip:id:";

const TRIP_COLUMNS: &str = "trip_id, driver_id, trip_type, point, point_lat, point_lon, \
     departure_time, seats_total, seats_available, price, comment, status, \
     max_deviation_km, time_flexibility_minutes, created_at";

impl Trip {
    pub fn destination(&self) -> Option<Point> {
        match (self.point_lat, self.point_lon) {
            (Some(lat), Some(lon)) => Some(Point::new(lat, lon)),
            _ => None,
        }
    }

    pub async fn create(
        pool: &PgPool,
        driver_id: &str,
        req: &CreateTripRequest,
        point: String,
        point_lat: Option<f64>,
        point_lon: Option<f64>,
    ) -> Result<Self, ServiceError> {
        let trip_id = Uuid::new_v4().to_string();

        let trip = sqlx::query_as::<_, Trip>(&format!(
            r#"
            INSERT INTO trips (
                trip_id, driver_id, trip_type, point, point_lat, point_lon,
                departure_time, seats_total, seats_available, price, comment,
                status, max_deviation_km, time_flexibility_minutes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, $10, 'active', $11, $12, NOW())
            RETURNING {TRIP_COLUMNS}
            "#
        ))
        .bind(&trip_id)
        .bind(driver_id)
        .bind(req.trip_type.as_str())
        .bind(&point)
        .bind(point_lat)
        .bind(point_lon)
        .bind(req.departure_time)
        .bind(req.seats_total)
        .bind(req.price)
        .bind(&req.comment)
        .bind(req.max_deviation_km)
        .bind(req.time_flexibility_minutes)
        .fetch_one(pool)
        .await?;

        Ok(trip)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        trip_id: &str,
    ) -> Result<Option<Self>, ServiceError> {
        let cache_key = format!("{}{}", TRIP_CACHE_PREFIX, trip_id);

        // 先查缓存
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(trip) = serde_json::from_str::<Trip>(&json_str) {
                    tracing::debug!("Get trip from cache: {}", cache_key);
                    return Ok(Some(trip));
                }
            }
        }

        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = $1"
        ))
        .bind(trip_id)
        .fetch_optional(pool)
        .await?;

        if let Some(ref t) = trip {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                if let Ok(json_str) = serde_json::to_string(t) {
                    let _: Result<(), redis::RedisError> =
                        conn.set_ex(&cache_key, json_str, TRIP_CACHE_EXPIRE).await;
                    tracing::debug!("Set trip to cache: {}", cache_key);
                }
            }
        }

        Ok(trip)
    }

    pub async fn invalidate_cache(redis: &Arc<RedisClient>, trip_id: &str) {
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", TRIP_CACHE_PREFIX, trip_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }
    }

    pub async fn list_active(
        pool: &PgPool,
        trip_type: Option<TripType>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, ServiceError> {
        let trips = sqlx::query_as::<_, Trip>(&format!(
            r#"
            SELECT {TRIP_COLUMNS}
            FROM trips
            WHERE status = 'active'
              AND ($1::text IS NULL OR trip_type = $1)
            ORDER BY departure_time
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(trip_type.map(|t| t.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(trips)
    }

    /// 排序引擎的候选集：活跃、同方向、有空位、未出发，可选时间窗
    pub async fn search_candidates(
        pool: &PgPool,
        trip_type: TripType,
        time_from: Option<DateTime<Utc>>,
        time_to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Self>, ServiceError> {
        let trips = sqlx::query_as::<_, Trip>(&format!(
            r#"
            SELECT {TRIP_COLUMNS}
            FROM trips
            WHERE status = 'active'
              AND trip_type = $1
              AND seats_available > 0
              AND departure_time >= NOW()
              AND ($2::timestamptz IS NULL OR departure_time >= $2)
              AND ($3::timestamptz IS NULL OR departure_time <= $3)
            ORDER BY departure_time
            "#
        ))
        .bind(trip_type.as_str())
        .bind(time_from)
        .bind(time_to)
        .fetch_all(pool)
        .await?;

        Ok(trips)
    }

    pub async fn list_by_driver(pool: &PgPool, driver_id: &str) -> Result<Vec<Self>, ServiceError> {
        let trips = sqlx::query_as::<_, Trip>(&format!(
            r#"
            SELECT {TRIP_COLUMNS}
            FROM trips
            WHERE driver_id = $1
            ORDER BY departure_time DESC
            "#
        ))
        .bind(driver_id)
        .fetch_all(pool)
        .await?;

        Ok(trips)
    }

    /// 行程状态变更（仅限司机本人），完成/取消时级联处理预订
    pub async fn update_status(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        trip_id: &str,
        driver_id: &str,
        new_status: TripStatus,
    ) -> Result<Self, ServiceError> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = $1 AND driver_id = $2"
        ))
        .bind(trip_id)
        .bind(driver_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound("行程不存在或无权操作".into()))?;

        if !trip_transition_allowed(trip.status, new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "行程无法从 {} 变为 {}",
                trip.status.as_str(),
                new_status.as_str()
            )));
        }

        let mut tx = pool.begin().await?;

        // 带当前状态守卫，防止并发状态变更互相覆盖
        let updated = sqlx::query_as::<_, Trip>(&format!(
            r#"
            UPDATE trips
            SET status = $1
            WHERE trip_id = $2 AND status = $3
            RETURNING {TRIP_COLUMNS}
            "#
        ))
        .bind(new_status.as_str())
        .bind(trip_id)
        .bind(trip.status.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::InvalidTransition("行程状态已被变更".into()))?;

        match new_status {
            TripStatus::Completed => {
                sqlx::query(
                    "UPDATE bookings SET status = 'completed' WHERE trip_id = $1 AND status = 'confirmed'",
                )
                .bind(trip_id)
                .execute(&mut *tx)
                .await?;
            }
            TripStatus::Cancelled => {
                sqlx::query(
                    "UPDATE bookings SET status = 'rejected' WHERE trip_id = $1 AND status IN ('pending', 'confirmed')",
                )
                .bind(trip_id)
                .execute(&mut *tx)
                .await?;
            }
            _ => {}
        }

        tx.commit().await?;

        Self::invalidate_cache(redis, trip_id).await;
        Ok(updated)
    }

    /// 批量补充司机信息
    pub async fn attach_drivers(
        pool: &PgPool,
        trips: Vec<Trip>,
    ) -> Result<Vec<TripInfo>, ServiceError> {
        let mut driver_ids: Vec<String> = trips.iter().map(|t| t.driver_id.clone()).collect();
        driver_ids.sort();
        driver_ids.dedup();

        let drivers: HashMap<String, User> = User::find_many(pool, &driver_ids)
            .await?
            .into_iter()
            .map(|u| (u.user_id.clone(), u))
            .collect();

        Ok(trips
            .into_iter()
            .map(|trip| {
                let driver = drivers.get(&trip.driver_id).cloned();
                TripInfo { trip, driver }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_transitions() {
        use TripStatus::*;
        assert!(trip_transition_allowed(Active, InProgress));
        assert!(trip_transition_allowed(Filled, InProgress));
        assert!(trip_transition_allowed(InProgress, Completed));
        assert!(trip_transition_allowed(Active, Cancelled));
        assert!(trip_transition_allowed(Filled, Cancelled));
        assert!(trip_transition_allowed(InProgress, Cancelled));

        // 终态不可再变
        assert!(!trip_transition_allowed(Completed, Cancelled));
        assert!(!trip_transition_allowed(Cancelled, Active));
        assert!(!trip_transition_allowed(Completed, InProgress));
        // 不允许倒退或跳步
        assert!(!trip_transition_allowed(Active, Completed));
        assert!(!trip_transition_allowed(InProgress, Active));
        assert!(!trip_transition_allowed(Filled, Active));
    }

    #[test]
    fn trip_type_round_trip() {
        assert_eq!(
            TripType::try_from("from_campus".to_string()).unwrap(),
            TripType::FromCampus
        );
        assert_eq!(TripType::FromCampus.as_str(), "from_campus");
        assert!(TripType::try_from("sideways".to_string()).is_err());
    }

    #[test]
    fn destination_requires_both_coordinates() {
        let mut trip = Trip {
            trip_id: "t".into(),
            driver_id: "d".into(),
            trip_type: TripType::FromCampus,
            point: "пр. 100-летия, 20".into(),
            point_lat: Some(43.1),
            point_lon: Some(131.95),
            departure_time: Utc::now(),
            seats_total: 4,
            seats_available: 4,
            price: 150,
            comment: None,
            status: TripStatus::Active,
            max_deviation_km: 3,
            time_flexibility_minutes: 30,
            created_at: Utc::now(),
        };
        assert!(trip.destination().is_some());

        trip.point_lon = None;
        assert!(trip.destination().is_none());
    }

    #[test]
    fn create_request_validation() {
        let base = CreateTripRequest {
            trip_type: TripType::FromCampus,
            point: "Русская 46".into(),
            point_lat: None,
            point_lon: None,
            departure_time: Utc::now() + chrono::Duration::hours(2),
            seats_total: 4,
            price: 100,
            comment: None,
            max_deviation_km: 3,
            time_flexibility_minutes: 30,
        };
        assert!(base.validate().is_ok());

        let mut bad = CreateTripRequest { seats_total: 0, ..clone_req(&base) };
        assert!(bad.validate().is_err());
        bad = CreateTripRequest { seats_total: 9, ..clone_req(&base) };
        assert!(bad.validate().is_err());
        bad = CreateTripRequest { price: -1, ..clone_req(&base) };
        assert!(bad.validate().is_err());
        bad = CreateTripRequest { max_deviation_km: 21, ..clone_req(&base) };
        assert!(bad.validate().is_err());
        bad = CreateTripRequest {
            departure_time: Utc::now() - chrono::Duration::hours(1),
            ..clone_req(&base)
        };
        assert!(bad.validate().is_err());
    }

    fn clone_req(req: &CreateTripRequest) -> CreateTripRequest {
        CreateTripRequest {
            trip_type: req.trip_type,
            point: req.point.clone(),
            point_lat: req.point_lat,
            point_lon: req.point_lon,
            departure_time: req.departure_time,
            seats_total: req.seats_total,
            price: req.price,
            comment: req.comment.clone(),
            max_deviation_km: req.max_deviation_km,
            time_flexibility_minutes: req.time_flexibility_minutes,
        }
    }
}
