use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

use crate::AppState;
use crate::error::ServiceError;
use crate::routes::booking::model::{Booking, BookingWithTrip};
use crate::routes::trip::model::Trip;
use crate::utils::success_to_api_response;

use super::model::{CreateUserRequest, User};

#[derive(Debug, Serialize)]
pub struct UserTripsResponse {
    pub as_driver: Vec<Trip>,
    pub as_passenger: Vec<BookingWithTrip>,
}

#[axum::debug_handler]
pub async fn create_or_get_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = User::get_or_create(
        &state.pool,
        req.tg_id,
        req.tg_username.as_deref(),
        req.first_name.as_deref(),
    )
    .await?;

    Ok((StatusCode::OK, success_to_api_response(user)))
}

#[axum::debug_handler]
pub async fn get_user_trips(
    State(state): State<AppState>,
    Path(tg_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = User::find_by_tg_id(&state.pool, tg_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("用户不存在".into()))?;

    let as_driver = Trip::list_by_driver(&state.pool, &user.user_id).await?;
    let as_passenger = Booking::list_for_passenger(&state.pool, &user.user_id).await?;

    Ok((
        StatusCode::OK,
        success_to_api_response(UserTripsResponse {
            as_driver,
            as_passenger,
        }),
    ))
}
