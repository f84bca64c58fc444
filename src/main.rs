// Wager Race Engine
// Aggregates externally-sourced wager stats into period leaderboards and
// runs time-boxed wager races over them: lifecycle, standings snapshots,
// prize payouts, and per-player position lookups.

mod cache;
mod config;
mod db;
mod error;
mod leaderboard;
mod position;
mod races;
mod scheduler;
mod stats;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tokio::sync::Mutex;

use cache::CacheManager;
use config::Config;
use leaderboard::LeaderboardData;
use stats::GoatedApiClient;

// ==================== SHARED STATE ====================

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub stats_client: Arc<GoatedApiClient>,
    pub leaderboard_cache: Arc<CacheManager<LeaderboardData>>,
    /// Serializes standings refreshes and race completion for the live race.
    pub race_lock: Arc<Mutex<()>>,
}

// ==================== API HANDLERS ====================

async fn health_check() -> &'static str {
    "Race engine healthy"
}

// ==================== MAIN ====================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenv::dotenv().ok();

    tracing::info!("🚀 Starting wager race engine...");

    let config = Arc::new(Config::from_env());

    let pool = db::connect(&config.database_url).await?;
    tracing::info!("🔗 Database connected");

    let state = AppState {
        db: pool,
        stats_client: Arc::new(GoatedApiClient::new(&config)),
        leaderboard_cache: Arc::new(CacheManager::new("leaderboard", config.cache_ttl)),
        race_lock: Arc::new(Mutex::new(())),
        config: config.clone(),
    };

    // Lifecycle + standings refresh loop.
    let scheduler_state = state.clone();
    tokio::spawn(async move {
        scheduler::run(scheduler_state).await;
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/affiliate/stats", get(leaderboard::affiliate_stats_handler))
        .route("/api/affiliate/search", get(leaderboard::search_handler))
        .route("/api/wager-races/current", get(races::current_race_handler))
        .route("/api/wager-races/previous", get(races::previous_race_handler))
        .route("/api/wager-race/position", get(position::race_position_handler))
        .route(
            "/api/admin/wager-races",
            get(races::list_races_handler).post(races::create_race_handler),
        )
        .route(
            "/api/admin/wager-races/:id/complete",
            post(races::force_complete_handler),
        )
        .route(
            "/api/admin/refresh-leaderboard",
            post(stats::refresh_leaderboard_handler),
        )
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("✅ Race engine running on {}", addr);
    tracing::info!("📊 Standings refresh every {:?}", config.refresh_interval);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
