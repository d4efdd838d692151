use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::ServiceError;
use crate::routes::user::model::User;
use crate::utils::success_to_api_response;

use super::model::{Booking, CreateBookingRequest, UpdateBookingRequest};

#[derive(Debug, Deserialize)]
pub struct PassengerQuery {
    pub passenger_tg_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DriverQuery {
    pub driver_tg_id: i64,
}

#[axum::debug_handler]
pub async fn book_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Query(query): Query<PassengerQuery>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let passenger = User::get_or_create(&state.pool, query.passenger_tg_id, None, None).await?;

    let booking = Booking::create(&state.pool, &trip_id, &passenger.user_id, &req).await?;

    tracing::info!(
        "Booking {} created on trip {} by passenger {}",
        booking.booking_id,
        trip_id,
        passenger.user_id
    );
    Ok((StatusCode::CREATED, success_to_api_response(booking)))
}

#[axum::debug_handler]
pub async fn update_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Query(query): Query<DriverQuery>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let driver = User::get_or_create(&state.pool, query.driver_tg_id, None, None).await?;

    let booking = Booking::set_status(
        &state.pool,
        &state.redis,
        &booking_id,
        &driver.user_id,
        req.status,
    )
    .await?;

    tracing::info!(
        "Booking {} moved to {} by driver {}",
        booking.booking_id,
        booking.status.as_str(),
        driver.user_id
    );
    Ok((StatusCode::OK, success_to_api_response(booking)))
}
