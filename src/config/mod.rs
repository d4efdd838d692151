use std::env;
use std::time::Duration;

use crate::geo::Point;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub stream_token_expiration_secs: u64,
    pub geocoder_api_key: String,
    pub geocoder_base_url: String,
    pub routing_api_key: String,
    pub routing_base_url: String,
    pub campus_lat: f64,
    pub campus_lon: f64,
    pub max_search_distance_km: f64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
}

// 校区坐标默认值（ДВФУ 主校区）
const DEFAULT_CAMPUS_LAT: f64 = 43.0245;
const DEFAULT_CAMPUS_LON: f64 = 131.8927;

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let stream_token_expiration = env::var("STREAM_TOKEN_EXPIRATION")
            .ok()
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(12);
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            stream_token_expiration_secs: stream_token_expiration * 3600,
            geocoder_api_key: env::var("GEOCODER_API_KEY")?,
            geocoder_base_url: env::var("GEOCODER_BASE_URL")
                .unwrap_or_else(|_| "https://geocode-maps.yandex.ru/1.x/".into()),
            routing_api_key: env::var("ROUTING_API_KEY")?,
            routing_base_url: env::var("ROUTING_BASE_URL")
                .unwrap_or_else(|_| "https://api.routing.yandex.net/v2/route".into()),
            campus_lat: env::var("CAMPUS_LAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAMPUS_LAT),
            campus_lon: env::var("CAMPUS_LON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAMPUS_LON),
            max_search_distance_km: env::var("MAX_SEARCH_DISTANCE_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50.0),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        })
    }

    pub fn campus(&self) -> Point {
        Point::new(self.campus_lat, self.campus_lon)
    }

    pub fn stream_token_expiration(&self) -> Duration {
        Duration::from_secs(self.stream_token_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
