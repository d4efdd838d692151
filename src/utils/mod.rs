use axum::Json;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const TRIP_UNAVAILABLE: i32 = 2000;
    pub const DUPLICATE_BOOKING: i32 = 2001;
    pub const INVALID_TRANSITION: i32 = 2002;
    pub const ADDRESS_NOT_FOUND: i32 = 3000;
    pub const UPSTREAM_ERROR: i32 = 3001;
    pub const BAD_STREAM_TOKEN: i32 = 4000;
    pub const INTERNAL_ERROR: i32 = 5000;
}

/// 位置上报令牌：限定 (行程, 司机)，行程创建时签发
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamClaims {
    pub sub: String,  // 司机用户ID
    pub trip: String, // 行程ID
    pub exp: i64,
    pub iat: i64,
}

pub fn generate_stream_token(
    trip_id: &str,
    driver_id: &str,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(chrono::Duration::seconds(
            config.stream_token_expiration_secs as i64,
        ))
        .expect("valid timestamp")
        .timestamp();

    let claims = StreamClaims {
        sub: driver_id.to_string(),
        trip: trip_id.to_string(),
        exp: expiration,
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_stream_token(
    token: &str,
    config: &Config,
) -> Result<StreamClaims, jsonwebtoken::errors::Error> {
    let token_data = decode::<StreamClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            redis_url: String::new(),
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            jwt_secret: "test-secret".into(),
            stream_token_expiration_secs: 3600,
            geocoder_api_key: String::new(),
            geocoder_base_url: String::new(),
            routing_api_key: String::new(),
            routing_base_url: String::new(),
            campus_lat: 43.0245,
            campus_lon: 131.8927,
            max_search_distance_km: 50.0,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
        }
    }

    #[test]
    fn stream_token_round_trip() {
        let config = test_config();
        let token = generate_stream_token("trip-1", "driver-1", &config).unwrap();
        let claims = verify_stream_token(&token, &config).unwrap();
        assert_eq!(claims.trip, "trip-1");
        assert_eq!(claims.sub, "driver-1");
    }

    #[test]
    fn stream_token_rejects_wrong_secret() {
        let config = test_config();
        let token = generate_stream_token("trip-1", "driver-1", &config).unwrap();

        let mut other = test_config();
        other.jwt_secret = "another-secret".into();
        assert!(verify_stream_token(&token, &other).is_err());
    }
}
