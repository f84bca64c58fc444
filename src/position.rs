// Race Position Module
// Answers "where do I rank, and did I move?" for one player from the
// persisted snapshot. Serving the snapshot keeps this endpoint alive while
// the external feed is down; its lastUpdated timestamp tells the caller
// how old the answer is. Unranked is a valid answer, never fabricated data.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppError;
use crate::races::{self, RaceParticipant, WagerRace};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RacePosition {
    /// None when the player has not wagered into the race yet.
    pub position: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_position: Option<i32>,
    pub total_participants: i64,
    pub wager_amount: f64,
    pub race_type: String,
    pub race_title: String,
    pub end_date: DateTime<Utc>,
    /// When the snapshot behind this answer was taken.
    pub last_updated: DateTime<Utc>,
}

pub fn build_position(
    race: &WagerRace,
    row: Option<&RaceParticipant>,
    total_participants: i64,
) -> RacePosition {
    RacePosition {
        position: row.map(|r| r.position),
        previous_position: row.and_then(|r| r.previous_position),
        total_participants,
        wager_amount: row.map(|r| r.wagered).unwrap_or(0.0),
        race_type: race.race_type.clone(),
        race_title: race.title.clone(),
        end_date: race.end_date,
        last_updated: race.updated_at,
    }
}

pub async fn race_position(
    pool: &PgPool,
    uid: Option<&str>,
    username: Option<&str>,
) -> Result<RacePosition, AppError> {
    let race = races::current_race(pool).await?.ok_or(AppError::NoActiveRace)?;

    let row = sqlx::query_as::<_, RaceParticipant>(
        "SELECT * FROM wager_race_participants \
         WHERE race_id = $1 AND (uid = $2 OR name = $3)",
    )
    .bind(&race.id)
    .bind(uid)
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM wager_race_participants WHERE race_id = $1")
            .bind(&race.id)
            .fetch_one(pool)
            .await?;

    Ok(build_position(&race, row.as_ref(), total))
}

// ==================== API HANDLER ====================

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "goatedUsername")]
    pub goated_username: Option<String>,
}

pub async fn race_position_handler(
    State(state): State<AppState>,
    Query(query): Query<PositionQuery>,
) -> Result<Json<RacePosition>, AppError> {
    let uid = query.user_id.as_deref().filter(|v| !v.trim().is_empty());
    let username = query
        .goated_username
        .as_deref()
        .filter(|v| !v.trim().is_empty());

    if uid.is_none() && username.is_none() {
        return Err(AppError::BadRequest(
            "either userId or goatedUsername is required".to_string(),
        ));
    }

    let position = race_position(&state.db, uid, username).await?;
    Ok(Json(position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race() -> WagerRace {
        WagerRace {
            id: "202501".to_string(),
            title: "Monthly Wager Race - January 2025".to_string(),
            race_type: "monthly".to_string(),
            status: "live".to_string(),
            start_date: "2025-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2025-01-31T23:59:59Z".parse().unwrap(),
            prize_pool: 500.0,
            min_wager: 0.0,
            prize_distribution: serde_json::json!({ "1": 50.0, "2": 30.0, "3": 20.0 }),
            created_at: "2024-12-28T12:00:00Z".parse().unwrap(),
            updated_at: "2025-01-15T09:30:00Z".parse().unwrap(),
        }
    }

    fn row(position: i32, previous: Option<i32>) -> RaceParticipant {
        RaceParticipant {
            race_id: "202501".to_string(),
            uid: "u1".to_string(),
            name: "Ann".to_string(),
            wagered: 4200.0,
            position,
            previous_position: previous,
            prize_amount: None,
        }
    }

    #[test]
    fn ranked_player_gets_position_and_delta() {
        let row = row(3, Some(5));
        let position = build_position(&race(), Some(&row), 40);

        assert_eq!(position.position, Some(3));
        assert_eq!(position.previous_position, Some(5));
        assert_eq!(position.total_participants, 40);
        assert_eq!(position.wager_amount, 4200.0);
        assert_eq!(position.race_type, "monthly");
    }

    #[test]
    fn first_snapshot_has_no_previous_position() {
        let row = row(3, None);
        let position = build_position(&race(), Some(&row), 40);
        assert_eq!(position.previous_position, None);
    }

    #[test]
    fn unranked_player_is_a_valid_answer() {
        let position = build_position(&race(), None, 40);

        assert_eq!(position.position, None);
        assert_eq!(position.previous_position, None);
        assert_eq!(position.wager_amount, 0.0);
        // Race context still comes back so the caller can render the widget.
        assert_eq!(position.race_title, "Monthly Wager Race - January 2025");
    }

    #[test]
    fn snapshot_timestamp_is_surfaced() {
        let position = build_position(&race(), None, 0);
        assert_eq!(position.last_updated, race().updated_at);
    }
}
