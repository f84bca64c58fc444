// External Stats Module
// Client for the casino platform's affiliate leaderboard feed, plus the
// cached fetch paths the rest of the service goes through.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::AppError;
use crate::leaderboard::{transform_leaderboard, LeaderboardData};
use crate::AppState;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 30;

/// Delay before retry number `retry` (0-based): 1s, 2s, 4s, ... capped at 30s.
fn backoff_delay(retry: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS.saturating_mul(2u64.saturating_pow(retry));
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

// ==================== API CLIENT ====================

pub struct GoatedApiClient {
    http: reqwest::Client,
    leaderboard_url: String,
    token: String,
    request_timeout: Duration,
}

impl GoatedApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            leaderboard_url: format!("{}{}", config.stats_base_url, config.stats_leaderboard_path),
            token: config.stats_api_token.clone(),
            request_timeout: config.request_timeout,
        }
    }

    /// Fetches and normalizes the leaderboard feed, retrying transient
    /// failures with exponential backoff before giving up.
    pub async fn fetch_leaderboard(&self) -> Result<LeaderboardData, AppError> {
        let mut last_error = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tracing::debug!("retrying leaderboard fetch in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once().await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    tracing::warn!(
                        "leaderboard fetch attempt {}/{} failed: {}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        err
                    );
                    last_error = err;
                }
            }
        }

        Err(AppError::StatsUnavailable(last_error))
    }

    async fn fetch_once(&self) -> Result<LeaderboardData, String> {
        let response = self
            .http
            .get(&self.leaderboard_url)
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("API request failed: {}", response.status()));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| format!("failed to parse response: {}", e))?;

        Ok(transform_leaderboard(&raw))
    }
}

// ==================== CACHED FETCH ====================

/// Read-through fetch: serves the cached leaderboard while fresh, coalesces
/// concurrent refreshes, and falls back to the stale copy when upstream is
/// down. Used by the scheduler, which tolerates the full retry budget.
pub async fn fetch_stats(state: &AppState) -> Result<Arc<LeaderboardData>, AppError> {
    let client = state.stats_client.clone();
    state
        .leaderboard_cache
        .get_or_fetch(false, || async move { client.fetch_leaderboard().await })
        .await
}

/// Same as [`fetch_stats`] but bounded by the request timeout, for
/// user-facing lookups that must not hang on a slow upstream. On timeout
/// the last cached value is served if one exists.
pub async fn fetch_stats_bounded(state: &AppState) -> Result<Arc<LeaderboardData>, AppError> {
    match tokio::time::timeout(state.config.request_timeout, fetch_stats(state)).await {
        Ok(result) => result,
        Err(_) => match state.leaderboard_cache.peek().await {
            Some(stale) => {
                tracing::warn!(
                    "stats fetch timed out, serving cached leaderboard ({:?} old)",
                    state.leaderboard_cache.age().await
                );
                Ok(stale)
            }
            None => Err(AppError::StatsUnavailable(
                "timed out waiting for stats".to_string(),
            )),
        },
    }
}

// ==================== API HANDLERS ====================

/// Drops the cache and pulls a fresh leaderboard. Wired to the admin
/// refresh endpoint the platform's cron job hits.
pub async fn refresh_leaderboard_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    state.leaderboard_cache.invalidate().await;

    let client = state.stats_client.clone();
    let data = state
        .leaderboard_cache
        .get_or_fetch(true, || async move { client.fetch_leaderboard().await })
        .await?;

    tracing::info!(
        "leaderboard cache refreshed, {} users",
        data.metadata.total_users
    );

    Ok(Json(json!({
        "status": "success",
        "message": "Leaderboard data refreshed",
        "totalUsers": data.metadata.total_users,
        "lastUpdated": data.metadata.last_updated,
    })))
}
