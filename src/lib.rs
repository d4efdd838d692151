use std::sync::Arc;

use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;

use geo::geocode::Geocoder;
use geo::route::RouteEstimator;
use hub::LocationHub;

pub mod config;
pub mod error;
pub mod geo;
pub mod hub;
pub mod matching;
pub mod middleware;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub hub: Arc<LocationHub>,
    pub geocoder: Arc<Geocoder>,
    pub router: Arc<RouteEstimator>,
}
