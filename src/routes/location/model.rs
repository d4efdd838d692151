use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::ServiceError;

/// 司机位置采样，按行程只追加、不修改
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DriverLocationSample {
    pub location_id: i64,
    pub trip_id: String,
    pub driver_id: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

/// 流通道入站消息
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InboundMessage {
    Location {
        token: String,
        lat: f64,
        lon: f64,
    },
}

impl DriverLocationSample {
    pub async fn insert(
        pool: &PgPool,
        trip_id: &str,
        driver_id: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Self, ServiceError> {
        let sample = sqlx::query_as::<_, DriverLocationSample>(
            r#"
            INSERT INTO driver_locations (trip_id, driver_id, lat, lon, timestamp)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING location_id, trip_id, driver_id, lat, lon, timestamp
            "#,
        )
        .bind(trip_id)
        .bind(driver_id)
        .bind(lat)
        .bind(lon)
        .fetch_one(pool)
        .await?;

        Ok(sample)
    }

    /// 最近一次采样即行程的"当前位置"
    pub async fn latest(pool: &PgPool, trip_id: &str) -> Result<Option<Self>, ServiceError> {
        let sample = sqlx::query_as::<_, DriverLocationSample>(
            r#"
            SELECT location_id, trip_id, driver_id, lat, lon, timestamp
            FROM driver_locations
            WHERE trip_id = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(pool)
        .await?;

        Ok(sample)
    }
}
