use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

mod cache;
mod config;
mod db;
mod error;
mod file_processor;
mod handlers;
mod middleware;
mod models;
mod openai_client;
mod store;

pub struct AppState {
    pub config: config::AppConfig,
    pub db_pool: sqlx::PgPool,
    pub store: store::ConversationStore,
    pub cache: Option<cache::RedisCache>,
    pub openai: openai_client::OpenAiClient,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = config::AppConfig::from_env();
    init_logging(&config).expect("Failed to initialize logging");

    // Create the database connection pool (runs migrations)
    let db_pool = db::create_pool(&config)
        .await
        .expect("Failed to create database pool.");

    // Redis backs the rate limiter; the service runs without it (fail open)
    let cache = match cache::RedisCache::connect(&config.redis_url, config.rate_limit_per_minute)
        .await
    {
        Ok(cache) => {
            tracing::info!("Connected to Redis");
            Some(cache)
        }
        Err(e) => {
            tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
            None
        }
    };

    if config.openai_api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY not set. Chat requests will fail until it is configured.");
    }
    let openai =
        openai_client::OpenAiClient::new(config.openai_api_key.clone(), config.openai_model.clone());

    let store = store::ConversationStore::new(db_pool.clone());

    let shared_state = Arc::new(AppState {
        config: config.clone(),
        db_pool,
        store,
        cache,
        openai,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::chat::chat_routes())
        .merge(handlers::conversations::conversation_routes())
        .merge(handlers::files::file_routes())
        .route("/health", get(health))
        .route("/", get(root))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(cors_layer(&config))
        .layer(Extension(shared_state.clone()));

    // ConnectInfo provides client socket addresses for rate limiting
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn init_logging(config: &config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    let default_level = if config.debug {
        "debug,conversa=trace,sqlx=info,reqwest=info,hyper=info"
    } else {
        "info,sqlx=warn,reqwest=warn,hyper=warn"
    };

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    // JSON logging for production log aggregation, human-readable otherwise
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("{} starting up...", config.app_name);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Model: {} | Upload limit: {}MB | Allowed extensions: {:?}",
        config.openai_model,
        config.max_file_size_mb,
        config.allowed_extensions
    );
    tracing::info!(
        "Rate limit: {}/min | Daily token budget: {}",
        config.rate_limit_per_minute,
        config.daily_token_budget
    );

    Ok(())
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let cache = match &state.cache {
        Some(cache) => {
            if cache.ping().await {
                "connected"
            } else {
                "disconnected"
            }
        }
        None => "disconnected",
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "cache": cache,
    }))
}

async fn root(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": format!("{} API", state.config.app_name),
        "health": "/health",
    }))
}
