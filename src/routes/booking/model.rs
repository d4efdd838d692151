use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::Client as RedisClient;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::routes::trip::model::{Trip, TripStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
        }
    }
}

impl TryFrom<String> for BookingStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// 预订状态机：pending -> {confirmed, rejected}；completed 仅由行程完成级联产生
pub fn booking_transition_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    matches!(
        (from, to),
        (BookingStatus::Pending, BookingStatus::Confirmed)
            | (BookingStatus::Pending, BookingStatus::Rejected)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub booking_id: String,
    pub trip_id: String,
    pub passenger_id: String,
    pub passenger_lat: Option<f64>,
    pub passenger_lon: Option<f64>,
    #[sqlx(try_from = "String")]
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub passenger_lat: Option<f64>,
    pub passenger_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Serialize)]
pub struct BookingWithTrip {
    #[serde(flatten)]
    pub booking: Booking,
    pub trip: Option<Trip>,
}

const BOOKING_COLUMNS: &str =
    "booking_id, trip_id, passenger_id, passenger_lat, passenger_lon, status, created_at";

impl Booking {
    /// 提交预订请求。座位在司机确认时才占用，先到先得以确认为准
    pub async fn create(
        pool: &PgPool,
        trip_id: &str,
        passenger_id: &str,
        req: &CreateBookingRequest,
    ) -> Result<Self, ServiceError> {
        let trip = sqlx::query_as::<_, Trip>(
            r#"
            SELECT trip_id, driver_id, trip_type, point, point_lat, point_lon,
                   departure_time, seats_total, seats_available, price, comment, status,
                   max_deviation_km, time_flexibility_minutes, created_at
            FROM trips
            WHERE trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound("行程不存在".into()))?;

        if trip.status != TripStatus::Active || trip.seats_available <= 0 {
            return Err(ServiceError::TripUnavailable("行程不可预订或已无空位".into()));
        }

        // 同一乘客在同一行程最多一条待处理/已确认预订
        let duplicate: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM bookings
                WHERE trip_id = $1 AND passenger_id = $2
                  AND status IN ('pending', 'confirmed')
            )
            "#,
        )
        .bind(trip_id)
        .bind(passenger_id)
        .fetch_one(pool)
        .await?;

        if duplicate {
            return Err(ServiceError::DuplicateBooking);
        }

        let booking_id = Uuid::new_v4().to_string();
        let booking = sqlx::query_as::<_, Booking>(&format!(
            r#"
            INSERT INTO bookings
                (booking_id, trip_id, passenger_id, passenger_lat, passenger_lon, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW())
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(&booking_id)
        .bind(trip_id)
        .bind(passenger_id)
        .bind(req.passenger_lat)
        .bind(req.passenger_lon)
        .fetch_one(pool)
        .await?;

        Ok(booking)
    }

    /// 司机确认或拒绝预订。确认时在同一事务内扣减座位，
    /// 两条 UPDATE 均带状态守卫：并发抢最后一个座位只有一方成功
    pub async fn set_status(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        booking_id: &str,
        driver_id: &str,
        new_status: BookingStatus,
    ) -> Result<Self, ServiceError> {
        // 结构性鉴权：只有父行程的司机能找到这条预订
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            SELECT b.booking_id, b.trip_id, b.passenger_id, b.passenger_lat, b.passenger_lon,
                   b.status, b.created_at
            FROM bookings b
            JOIN trips t ON t.trip_id = b.trip_id
            WHERE b.booking_id = $1 AND t.driver_id = $2
            "#,
        )
        .bind(booking_id)
        .bind(driver_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound("预订不存在或无权操作".into()))?;

        if !booking_transition_allowed(booking.status, new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "预订无法从 {} 变为 {}",
                booking.status.as_str(),
                new_status.as_str()
            )));
        }

        let updated = match new_status {
            BookingStatus::Confirmed => {
                let mut tx = pool.begin().await?;

                let updated = sqlx::query_as::<_, Booking>(&format!(
                    r#"
                    UPDATE bookings
                    SET status = 'confirmed'
                    WHERE booking_id = $1 AND status = 'pending'
                    RETURNING {BOOKING_COLUMNS}
                    "#
                ))
                .bind(booking_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidTransition("预订状态已被变更".into())
                })?;

                // seats_available 守卫使并发确认最后一个座位时只有一条成功；
                // CASE 中读到的是更新前的值
                let seats_taken = sqlx::query(
                    r#"
                    UPDATE trips
                    SET seats_available = seats_available - 1,
                        status = CASE WHEN seats_available = 1 THEN 'filled' ELSE status END
                    WHERE trip_id = $1 AND seats_available > 0
                    "#,
                )
                .bind(&booking.trip_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if seats_taken == 0 {
                    tx.rollback().await?;
                    return Err(ServiceError::TripUnavailable("已无空位".into()));
                }

                tx.commit().await?;
                updated
            }
            BookingStatus::Rejected => sqlx::query_as::<_, Booking>(&format!(
                r#"
                UPDATE bookings
                SET status = 'rejected'
                WHERE booking_id = $1 AND status = 'pending'
                RETURNING {BOOKING_COLUMNS}
                "#
            ))
            .bind(booking_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ServiceError::InvalidTransition("预订状态已被变更".into()))?,
            _ => unreachable!("transition table only admits confirmed/rejected"),
        };

        Trip::invalidate_cache(redis, &booking.trip_id).await;
        Ok(updated)
    }

    pub async fn list_for_trip(pool: &PgPool, trip_id: &str) -> Result<Vec<Self>, ServiceError> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE trip_id = $1
            ORDER BY created_at
            "#
        ))
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        Ok(bookings)
    }

    /// 乘客视角的预订列表，附带行程信息
    pub async fn list_for_passenger(
        pool: &PgPool,
        passenger_id: &str,
    ) -> Result<Vec<BookingWithTrip>, ServiceError> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE passenger_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(passenger_id)
        .fetch_all(pool)
        .await?;

        let mut result = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let trip = sqlx::query_as::<_, Trip>(
                r#"
                SELECT trip_id, driver_id, trip_type, point, point_lat, point_lon,
                       departure_time, seats_total, seats_available, price, comment, status,
                       max_deviation_km, time_flexibility_minutes, created_at
                FROM trips
                WHERE trip_id = $1
                "#,
            )
            .bind(&booking.trip_id)
            .fetch_optional(pool)
            .await?;
            result.push(BookingWithTrip { booking, trip });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_can_transition() {
        use BookingStatus::*;
        assert!(booking_transition_allowed(Pending, Confirmed));
        assert!(booking_transition_allowed(Pending, Rejected));

        assert!(!booking_transition_allowed(Confirmed, Rejected));
        assert!(!booking_transition_allowed(Rejected, Confirmed));
        assert!(!booking_transition_allowed(Rejected, Pending));
        assert!(!booking_transition_allowed(Completed, Confirmed));
        // completed 只能由行程完成级联写入，不能直接设置
        assert!(!booking_transition_allowed(Pending, Completed));
        assert!(!booking_transition_allowed(Confirmed, Completed));
    }

    #[test]
    fn booking_status_round_trip() {
        assert_eq!(
            BookingStatus::try_from("pending".to_string()).unwrap(),
            BookingStatus::Pending
        );
        assert_eq!(BookingStatus::Confirmed.as_str(), "confirmed");
        assert!(BookingStatus::try_from("held".to_string()).is_err());
    }
}
