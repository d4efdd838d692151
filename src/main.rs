use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use campus_ride_backend::{
    AppState,
    config::Config,
    geo::geocode::Geocoder,
    geo::route::{RouteEstimator, YandexRouter},
    hub::LocationHub,
    middleware::{RateLimiter, log_errors, rate_limit},
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'campus_ride_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    // 位置广播中枢与外部服务客户端
    let hub = Arc::new(LocationHub::new());
    let geocoder = Arc::new(Geocoder::new(&config));
    let router_client = Arc::new(RouteEstimator::new(
        pool.clone(),
        Arc::new(YandexRouter::new(&config)),
    ));

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        hub,
        geocoder,
        router: router_client,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    let api_routes = Router::new()
        // 用户
        .route("/users", post(routes::user::create_or_get_user))
        .route("/users/{tg_id}/trips", get(routes::user::get_user_trips))
        // 行程
        .route(
            "/trips",
            post(routes::trip::create_trip).get(routes::trip::list_trips),
        )
        .route("/trips/search", get(routes::trip::search_trips))
        .route("/trips/{trip_id}", get(routes::trip::trip_detail))
        .route(
            "/trips/{trip_id}/status",
            patch(routes::trip::update_trip_status),
        )
        // 预订
        .route("/trips/{trip_id}/book", post(routes::booking::book_trip))
        .route(
            "/bookings/{booking_id}",
            patch(routes::booking::update_booking),
        );

    // 行程实时位置流
    let ws_routes = Router::new().route("/ws/trips/{trip_id}", get(routes::location::trip_stream));

    let router = Router::new().nest("/api", api_routes).merge(ws_routes);

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
