// Wager Race Engine
// Owns race lifecycle (upcoming -> live -> completed), the participant
// snapshot, and prize payouts. The engine is the only writer of the
// wager_races / wager_race_participants tables.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppError;
use crate::leaderboard::{LeaderboardEntry, PeriodKey};
use crate::AppState;

/// Participants returned with the current-race payload.
pub const TOP_PARTICIPANTS: i64 = 10;

// ==================== DATA STRUCTURES ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    Upcoming,
    Live,
    Completed,
}

impl RaceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(RaceStatus::Upcoming),
            "live" => Some(RaceStatus::Live),
            "completed" => Some(RaceStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Upcoming => "upcoming",
            RaceStatus::Live => "live",
            RaceStatus::Completed => "completed",
        }
    }

    /// Lifecycle is monotonic: upcoming -> live -> completed, nothing else.
    pub fn can_transition(&self, next: RaceStatus) -> bool {
        matches!(
            (self, next),
            (RaceStatus::Upcoming, RaceStatus::Live) | (RaceStatus::Live, RaceStatus::Completed)
        )
    }
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WagerRace {
    /// YYYYMM for monthly races.
    pub id: String,
    pub title: String,
    pub race_type: String, // "monthly" | "weekly" | "weekend"
    pub status: String,    // RaceStatus::as_str
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub prize_pool: f64,
    pub min_wager: f64,
    /// Rank -> percentage share of the prize pool, e.g. { "1": 50, "2": 30 }.
    pub prize_distribution: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WagerRace {
    pub fn parsed_status(&self) -> Result<RaceStatus, AppError> {
        RaceStatus::parse(&self.status).ok_or_else(|| {
            AppError::InvalidRace(format!("race {} has unknown status {:?}", self.id, self.status))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RaceParticipant {
    pub race_id: String,
    pub uid: String,
    pub name: String,
    pub wagered: f64,
    pub position: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_position: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_amount: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDetail {
    #[serde(flatten)]
    pub race: WagerRace,
    pub participants: Vec<RaceParticipant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRace {
    pub id: String,
    pub title: String,
    #[serde(default = "default_race_type")]
    pub race_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub prize_pool: f64,
    #[serde(default)]
    pub min_wager: f64,
    pub prize_distribution: BTreeMap<String, f64>,
}

fn default_race_type() -> String {
    "monthly".to_string()
}

impl NewRace {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidRace("id must not be empty".to_string()));
        }
        if self.start_date >= self.end_date {
            return Err(AppError::InvalidRace(
                "startDate must precede endDate".to_string(),
            ));
        }
        if !self.prize_pool.is_finite() || self.prize_pool < 0.0 {
            return Err(AppError::InvalidRace(
                "prizePool must be a non-negative amount".to_string(),
            ));
        }
        if !self.min_wager.is_finite() || self.min_wager < 0.0 {
            return Err(AppError::InvalidRace(
                "minWager must be a non-negative amount".to_string(),
            ));
        }
        if self.prize_distribution.is_empty() {
            return Err(AppError::InvalidRace(
                "prizeDistribution must not be empty".to_string(),
            ));
        }

        let mut total = 0.0;
        for (rank, share) in &self.prize_distribution {
            if rank.parse::<u32>().map(|r| r == 0).unwrap_or(true) {
                return Err(AppError::InvalidRace(format!(
                    "prizeDistribution rank {:?} is not a positive integer",
                    rank
                )));
            }
            if !share.is_finite() || *share <= 0.0 {
                return Err(AppError::InvalidRace(format!(
                    "prizeDistribution share for rank {} must be positive",
                    rank
                )));
            }
            total += share;
        }
        if total - 100.0 > 1e-6 {
            return Err(AppError::InvalidRace(format!(
                "prizeDistribution shares sum to {}%, which exceeds the pool",
                total
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub uid: String,
    pub name: String,
    pub wagered: f64,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payout {
    pub uid: String,
    pub position: i32,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResults {
    pub race_id: String,
    pub payouts: Vec<Payout>,
}

// ==================== RANKING & PAYOUTS ====================

/// Ranks eligible entries by the race period's wagered amount: dense
/// 1-based positions, descending, ties keeping input order. Re-running on
/// identical input produces identical output.
pub fn rank_standings(
    entries: &[LeaderboardEntry],
    period: PeriodKey,
    min_wager: f64,
) -> Vec<RankedEntry> {
    let mut eligible: Vec<(&LeaderboardEntry, f64)> = entries
        .iter()
        .map(|e| (e, e.wagered.for_period(period)))
        .filter(|(_, amount)| *amount > 0.0 && (min_wager <= 0.0 || *amount >= min_wager))
        .collect();

    eligible.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    eligible
        .into_iter()
        .enumerate()
        .map(|(idx, (entry, amount))| RankedEntry {
            uid: entry.uid.clone(),
            name: entry.name.clone(),
            wagered: amount,
            position: (idx + 1) as i32,
        })
        .collect()
}

/// Percentage payouts for ranks present in the distribution; everyone else
/// gets nothing. The creation-time validation keeps shares at or below
/// 100%, so the summed payouts never exceed the pool.
pub fn compute_payouts(
    distribution: &Value,
    prize_pool: f64,
    standings: &[RaceParticipant],
) -> Vec<Payout> {
    standings
        .iter()
        .filter_map(|participant| {
            distribution
                .get(participant.position.to_string())
                .and_then(Value::as_f64)
                .map(|share| Payout {
                    uid: participant.uid.clone(),
                    position: participant.position,
                    amount: prize_pool * (share / 100.0),
                })
        })
        .collect()
}

// ==================== PERSISTENCE ====================

pub async fn current_race(pool: &PgPool) -> Result<Option<WagerRace>, AppError> {
    let race = sqlx::query_as::<_, WagerRace>(
        "SELECT * FROM wager_races WHERE status = 'live' ORDER BY start_date DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(race)
}

pub async fn previous_race(pool: &PgPool) -> Result<Option<WagerRace>, AppError> {
    let race = sqlx::query_as::<_, WagerRace>(
        "SELECT * FROM wager_races WHERE status = 'completed' ORDER BY end_date DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(race)
}

pub async fn race_by_id(pool: &PgPool, id: &str) -> Result<Option<WagerRace>, AppError> {
    let race = sqlx::query_as::<_, WagerRace>("SELECT * FROM wager_races WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(race)
}

pub async fn list_races(pool: &PgPool) -> Result<Vec<WagerRace>, AppError> {
    let races =
        sqlx::query_as::<_, WagerRace>("SELECT * FROM wager_races ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
    Ok(races)
}

pub async fn create_race(pool: &PgPool, new_race: &NewRace) -> Result<WagerRace, AppError> {
    new_race.validate()?;

    if race_by_id(pool, &new_race.id).await?.is_some() {
        return Err(AppError::InvalidRace(format!(
            "race {} already exists",
            new_race.id
        )));
    }

    let distribution = serde_json::to_value(&new_race.prize_distribution)
        .map_err(|e| AppError::InvalidRace(format!("invalid prizeDistribution: {}", e)))?;

    let race = sqlx::query_as::<_, WagerRace>(
        "INSERT INTO wager_races \
            (id, title, race_type, status, start_date, end_date, prize_pool, min_wager, prize_distribution) \
         VALUES ($1, $2, $3, 'upcoming', $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(&new_race.id)
    .bind(&new_race.title)
    .bind(&new_race.race_type)
    .bind(new_race.start_date)
    .bind(new_race.end_date)
    .bind(new_race.prize_pool)
    .bind(new_race.min_wager)
    .bind(distribution)
    .fetch_one(pool)
    .await?;

    tracing::info!("race {} created ({} -> {})", race.id, race.start_date, race.end_date);
    Ok(race)
}

pub async fn participants(
    pool: &PgPool,
    race_id: &str,
    limit: Option<i64>,
) -> Result<Vec<RaceParticipant>, AppError> {
    let rows = sqlx::query_as::<_, RaceParticipant>(
        "SELECT * FROM wager_race_participants WHERE race_id = $1 ORDER BY position LIMIT $2",
    )
    .bind(race_id)
    .bind(limit.unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replaces the race's participant snapshot in one transaction. Positions
/// from the outgoing snapshot are carried over as `previous_position` so
/// rank deltas survive the replace. A failure rolls the whole refresh back
/// and leaves the prior snapshot untouched.
pub async fn refresh_standings(
    pool: &PgPool,
    race: &WagerRace,
    entries: &[LeaderboardEntry],
) -> Result<usize, AppError> {
    if race.parsed_status()? != RaceStatus::Live {
        tracing::warn!(
            "refusing standings refresh for race {} in status {}",
            race.id,
            race.status
        );
        return Err(AppError::InvalidTransition(format!(
            "race {} is {}, standings are frozen",
            race.id, race.status
        )));
    }

    let period = PeriodKey::for_race_type(&race.race_type);
    let ranked = rank_standings(entries, period, race.min_wager);

    let mut tx = pool.begin().await?;

    let previous: Vec<(String, i32)> =
        sqlx::query_as("SELECT uid, position FROM wager_race_participants WHERE race_id = $1")
            .bind(&race.id)
            .fetch_all(&mut tx)
            .await?;
    let previous: HashMap<String, i32> = previous.into_iter().collect();

    sqlx::query("DELETE FROM wager_race_participants WHERE race_id = $1")
        .bind(&race.id)
        .execute(&mut tx)
        .await?;

    for row in &ranked {
        sqlx::query(
            "INSERT INTO wager_race_participants \
                (race_id, uid, name, wagered, position, previous_position) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&race.id)
        .bind(&row.uid)
        .bind(&row.name)
        .bind(row.wagered)
        .bind(row.position)
        .bind(previous.get(&row.uid).copied())
        .execute(&mut tx)
        .await?;
    }

    sqlx::query("UPDATE wager_races SET updated_at = NOW() WHERE id = $1")
        .bind(&race.id)
        .execute(&mut tx)
        .await?;

    tx.commit().await?;

    tracing::debug!(
        "race {} standings refreshed, {} participants",
        race.id,
        ranked.len()
    );
    Ok(ranked.len())
}

/// Completes a live race: flips the status with a check-and-set guard,
/// writes prize amounts onto the winning snapshot rows, and returns the
/// payout list. Everything happens in one transaction; a mid-flight
/// failure leaves the race live with its snapshot intact.
pub async fn complete_race(
    pool: &PgPool,
    race_id: &str,
    forced: bool,
) -> Result<RaceResults, AppError> {
    let mut tx = pool.begin().await?;

    let race = sqlx::query_as::<_, WagerRace>("SELECT * FROM wager_races WHERE id = $1 FOR UPDATE")
        .bind(race_id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("race {}", race_id)))?;

    let status = race.parsed_status()?;
    if !status.can_transition(RaceStatus::Completed) {
        tracing::warn!("refusing to complete race {} in status {}", race.id, race.status);
        return Err(AppError::InvalidTransition(format!(
            "race {} is {}, not live",
            race.id, race.status
        )));
    }

    if Utc::now() < race.end_date {
        if forced {
            tracing::warn!(
                "force-completing race {} before its end date {}",
                race.id,
                race.end_date
            );
        } else {
            return Err(AppError::InvalidTransition(format!(
                "race {} does not end until {}",
                race.id, race.end_date
            )));
        }
    }

    let updated = sqlx::query(
        "UPDATE wager_races SET status = 'completed', updated_at = NOW() \
         WHERE id = $1 AND status = 'live'",
    )
    .bind(&race.id)
    .execute(&mut tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::InvalidTransition(format!(
            "race {} was completed concurrently",
            race.id
        )));
    }

    let standings = sqlx::query_as::<_, RaceParticipant>(
        "SELECT * FROM wager_race_participants WHERE race_id = $1 ORDER BY position",
    )
    .bind(&race.id)
    .fetch_all(&mut tx)
    .await?;

    let payouts = compute_payouts(&race.prize_distribution, race.prize_pool, &standings);
    for payout in &payouts {
        sqlx::query(
            "UPDATE wager_race_participants SET prize_amount = $1 WHERE race_id = $2 AND uid = $3",
        )
        .bind(payout.amount)
        .bind(&race.id)
        .bind(&payout.uid)
        .execute(&mut tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!("race {} completed, {} payouts issued", race.id, payouts.len());
    Ok(RaceResults {
        race_id: race.id,
        payouts,
    })
}

/// Promotes upcoming races whose start date has passed, one at a time with
/// a check-and-set so a scope never ends up with two live races.
pub async fn advance_upcoming(pool: &PgPool) -> Result<Vec<String>, AppError> {
    let candidates: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, race_type FROM wager_races \
         WHERE status = 'upcoming' AND start_date <= NOW() ORDER BY start_date",
    )
    .fetch_all(pool)
    .await?;

    let mut promoted = Vec::new();
    for (id, race_type) in candidates {
        let updated = sqlx::query(
            "UPDATE wager_races SET status = 'live', updated_at = NOW() \
             WHERE id = $1 AND status = 'upcoming' \
               AND NOT EXISTS (
                 SELECT 1 FROM wager_races live \
                 WHERE live.status = 'live' AND live.race_type = $2
               )",
        )
        .bind(&id)
        .bind(&race_type)
        .execute(pool)
        .await?;

        if updated.rows_affected() > 0 {
            tracing::info!("race {} is now live", id);
            promoted.push(id);
        }
    }
    Ok(promoted)
}

// ==================== API HANDLERS ====================

pub async fn current_race_handler(
    State(state): State<AppState>,
) -> Result<Json<RaceDetail>, AppError> {
    let race = current_race(&state.db).await?.ok_or(AppError::NoActiveRace)?;
    let participants = participants(&state.db, &race.id, Some(TOP_PARTICIPANTS)).await?;
    Ok(Json(RaceDetail { race, participants }))
}

pub async fn previous_race_handler(
    State(state): State<AppState>,
) -> Result<Json<RaceDetail>, AppError> {
    let race = previous_race(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("previous race".to_string()))?;
    let participants = participants(&state.db, &race.id, None).await?;
    Ok(Json(RaceDetail { race, participants }))
}

pub async fn list_races_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<WagerRace>>, AppError> {
    Ok(Json(list_races(&state.db).await?))
}

pub async fn create_race_handler(
    State(state): State<AppState>,
    Json(new_race): Json<NewRace>,
) -> Result<(StatusCode, Json<WagerRace>), AppError> {
    let race = create_race(&state.db, &new_race).await?;
    Ok((StatusCode::CREATED, Json(race)))
}

/// Administrative override: completes a race regardless of its end date.
pub async fn force_complete_handler(
    State(state): State<AppState>,
    Path(race_id): Path<String>,
) -> Result<Json<RaceResults>, AppError> {
    // Hold the race lock so a scheduler refresh cannot interleave.
    let _guard = state.race_lock.lock().await;
    let results = complete_race(&state.db, &race_id, true).await?;
    Ok(Json(results))
}
