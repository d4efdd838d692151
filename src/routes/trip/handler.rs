use std::collections::HashMap;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ServiceError;
use crate::geo::Point;
use crate::matching::{self, RankRequest};
use crate::routes::booking::model::Booking;
use crate::routes::location::model::DriverLocationSample;
use crate::routes::user::model::User;
use crate::utils::{generate_stream_token, success_to_api_response};

use super::model::{
    CreateTripRequest, Trip, TripInfo, TripType, UpdateTripStatusRequest,
};

#[derive(Debug, Deserialize)]
pub struct DriverQuery {
    pub driver_tg_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub trip_type: Option<TripType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub trip_type: TripType,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub max_distance_km: Option<f64>,
    pub max_deviation_minutes: Option<f64>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreateTripResponse {
    #[serde(flatten)]
    pub trip: Trip,
    pub driver: User,
    // 位置上报令牌，司机端通过 WebSocket 上报位置时携带
    pub stream_token: String,
}

#[derive(Debug, Serialize)]
pub struct ScoredTripInfo {
    #[serde(flatten)]
    pub trip: Trip,
    pub driver: Option<User>,
    pub distance_km: f64,
    pub deviation_minutes: f64,
}

#[derive(Debug, Serialize)]
pub struct TripDetail {
    #[serde(flatten)]
    pub trip: Trip,
    pub driver: Option<User>,
    pub bookings: Vec<Booking>,
    // 最近一次司机位置采样
    pub current_location: Option<DriverLocationSample>,
}

#[axum::debug_handler]
pub async fn create_trip(
    State(state): State<AppState>,
    Query(query): Query<DriverQuery>,
    Json(req): Json<CreateTripRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;

    let driver = User::get_or_create(&state.pool, query.driver_tg_id, None, None).await?;

    // 客户端给了坐标就直接用，否则走地理编码（缓存 -> 外部服务）
    let (point, point_lat, point_lon) = match (req.point_lat, req.point_lon) {
        (Some(lat), Some(lon)) => (req.point.clone(), Some(lat), Some(lon)),
        _ => {
            let geocoded = state.geocoder.resolve(&state.pool, &req.point).await?;
            (
                geocoded.formatted_address,
                Some(geocoded.lat),
                Some(geocoded.lon),
            )
        }
    };

    let trip = Trip::create(&state.pool, &driver.user_id, &req, point, point_lat, point_lon)
        .await?;

    let stream_token = generate_stream_token(&trip.trip_id, &driver.user_id, &state.config)
        .map_err(|e| ServiceError::Internal(format!("failed to sign stream token: {}", e)))?;

    tracing::info!("Trip {} created by driver {}", trip.trip_id, driver.user_id);
    Ok((
        StatusCode::CREATED,
        success_to_api_response(CreateTripResponse {
            trip,
            driver,
            stream_token,
        }),
    ))
}

#[axum::debug_handler]
pub async fn list_trips(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let trips = Trip::list_active(&state.pool, query.trip_type, limit, offset).await?;
    let infos = Trip::attach_drivers(&state.pool, trips).await?;

    Ok((StatusCode::OK, success_to_api_response(infos)))
}

#[axum::debug_handler]
pub async fn search_trips(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    // 地址优先；否则要求显式坐标
    let passenger = match &query.address {
        Some(address) => {
            let geocoded = state.geocoder.resolve(&state.pool, address).await?;
            Point::new(geocoded.lat, geocoded.lon)
        }
        None => match (query.lat, query.lon) {
            (Some(lat), Some(lon)) => Point::new(lat, lon),
            _ => {
                return Err(ServiceError::Validation("请提供地址或坐标".into()));
            }
        },
    };

    let max_distance_km = query
        .max_distance_km
        .unwrap_or(5.0)
        .min(state.config.max_search_distance_km);
    let max_deviation_minutes = query.max_deviation_minutes.unwrap_or(30.0);

    let candidates =
        Trip::search_candidates(&state.pool, query.trip_type, query.time_from, query.time_to)
            .await?;

    let rank_request = RankRequest {
        passenger,
        trip_type: query.trip_type,
        campus: state.config.campus(),
        max_distance_km,
        max_deviation_minutes,
    };
    let ranked = matching::rank(&rank_request, candidates, state.router.as_ref()).await?;

    // 批量补充司机信息
    let mut driver_ids: Vec<String> = ranked
        .iter()
        .map(|s| s.trip.driver_id.clone())
        .collect();
    driver_ids.sort();
    driver_ids.dedup();
    let drivers: HashMap<String, User> = User::find_many(&state.pool, &driver_ids)
        .await?
        .into_iter()
        .map(|u| (u.user_id.clone(), u))
        .collect();

    let result: Vec<ScoredTripInfo> = ranked
        .into_iter()
        .map(|scored| {
            let driver = drivers.get(&scored.trip.driver_id).cloned();
            ScoredTripInfo {
                driver,
                distance_km: scored.distance_km,
                deviation_minutes: scored.deviation_minutes,
                trip: scored.trip,
            }
        })
        .collect();

    Ok((StatusCode::OK, success_to_api_response(result)))
}

#[axum::debug_handler]
pub async fn trip_detail(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let trip = Trip::find_by_id(&state.pool, &state.redis, &trip_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("行程不存在".into()))?;

    let driver = User::find_many(&state.pool, std::slice::from_ref(&trip.driver_id))
        .await?
        .into_iter()
        .next();
    let bookings = Booking::list_for_trip(&state.pool, &trip_id).await?;
    let current_location = DriverLocationSample::latest(&state.pool, &trip_id).await?;

    Ok((
        StatusCode::OK,
        success_to_api_response(TripDetail {
            trip,
            driver,
            bookings,
            current_location,
        }),
    ))
}

#[axum::debug_handler]
pub async fn update_trip_status(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Query(query): Query<DriverQuery>,
    Json(req): Json<UpdateTripStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let driver = User::get_or_create(&state.pool, query.driver_tg_id, None, None).await?;

    let trip =
        Trip::update_status(&state.pool, &state.redis, &trip_id, &driver.user_id, req.status)
            .await?;

    tracing::info!("Trip {} moved to {}", trip.trip_id, trip.status.as_str());
    Ok((
        StatusCode::OK,
        success_to_api_response(TripInfo {
            trip,
            driver: Some(driver),
        }),
    ))
}
