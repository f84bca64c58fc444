// Leaderboard Module
// Normalizes the raw affiliate feed into the four-period shape the rest of
// the service works with, and answers lookup/search queries over it.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::AppError;
use crate::stats;
use crate::AppState;

/// Maximum results returned by a player search.
pub const SEARCH_LIMIT: usize = 10;

// ==================== DATA STRUCTURES ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKey {
    Today,
    Weekly,
    Monthly,
    AllTime,
}

impl PeriodKey {
    /// The window a race of the given type ranks on.
    pub fn for_race_type(race_type: &str) -> Self {
        match race_type {
            "weekly" | "weekend" => PeriodKey::Weekly,
            _ => PeriodKey::Monthly,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WagerTotals {
    pub today: f64,
    pub this_week: f64,
    pub this_month: f64,
    pub all_time: f64,
}

impl WagerTotals {
    pub fn for_period(&self, period: PeriodKey) -> f64 {
        match period {
            PeriodKey::Today => self.today,
            PeriodKey::Weekly => self.this_week,
            PeriodKey::Monthly => self.this_month,
            PeriodKey::AllTime => self.all_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub uid: String,
    pub name: String,
    pub wagered: WagerTotals,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodData {
    pub data: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardPeriods {
    pub today: PeriodData,
    pub weekly: PeriodData,
    pub monthly: PeriodData,
    pub all_time: PeriodData,
}

impl LeaderboardPeriods {
    pub fn get(&self, period: PeriodKey) -> &[LeaderboardEntry] {
        match period {
            PeriodKey::Today => &self.today.data,
            PeriodKey::Weekly => &self.weekly.data,
            PeriodKey::Monthly => &self.monthly.data,
            PeriodKey::AllTime => &self.all_time.data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardMetadata {
    pub total_users: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardData {
    pub metadata: LeaderboardMetadata,
    pub data: LeaderboardPeriods,
}

// ==================== FEED TRANSFORM ====================

/// Builds the four-period leaderboard from the raw feed payload.
///
/// The upstream response shape has drifted over time: the entry array has
/// been seen under `data`, under `results`, and as the top-level value, and
/// single-entry responses arrive as a bare object. All variants are
/// accepted. Entries without a `wagered` object are dropped; missing
/// amounts read as zero.
pub fn transform_leaderboard(raw: &Value) -> LeaderboardData {
    let payload = raw.get("data").or_else(|| raw.get("results")).unwrap_or(raw);

    let rows: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![payload],
        _ => Vec::new(),
    };

    let entries: Vec<LeaderboardEntry> = rows
        .into_iter()
        .filter_map(parse_entry)
        .collect();

    LeaderboardData {
        metadata: LeaderboardMetadata {
            total_users: entries.len(),
            last_updated: Utc::now(),
        },
        data: LeaderboardPeriods {
            today: PeriodData {
                data: sort_by_wagered(&entries, PeriodKey::Today),
            },
            weekly: PeriodData {
                data: sort_by_wagered(&entries, PeriodKey::Weekly),
            },
            monthly: PeriodData {
                data: sort_by_wagered(&entries, PeriodKey::Monthly),
            },
            all_time: PeriodData {
                data: sort_by_wagered(&entries, PeriodKey::AllTime),
            },
        },
    }
}

fn parse_entry(row: &Value) -> Option<LeaderboardEntry> {
    let wagered = row.get("wagered")?.as_object()?;

    let amount = |key: &str| wagered.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    Some(LeaderboardEntry {
        uid: row
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        name: row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Anonymous")
            .to_string(),
        wagered: WagerTotals {
            today: amount("today"),
            this_week: amount("this_week"),
            this_month: amount("this_month"),
            all_time: amount("all_time"),
        },
    })
}

/// One period's list: players with a non-zero wager for that window, sorted
/// descending. The sort is stable, so ties keep feed order.
fn sort_by_wagered(entries: &[LeaderboardEntry], period: PeriodKey) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<LeaderboardEntry> = entries
        .iter()
        .filter(|e| e.wagered.for_period(period) > 0.0)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.wagered
            .for_period(period)
            .partial_cmp(&a.wagered.for_period(period))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

// ==================== LOOKUP & SEARCH ====================

pub fn find_by_uid<'a>(entries: &'a [LeaderboardEntry], uid: &str) -> Option<&'a LeaderboardEntry> {
    entries.iter().find(|e| e.uid == uid)
}

/// Case-insensitive substring search over player names across every period.
/// Periods are scanned all_time, monthly, weekly, today; the first entry
/// seen for a uid wins, and at most [`SEARCH_LIMIT`] players come back.
pub fn search(data: &LeaderboardData, query: &str) -> Vec<LeaderboardEntry> {
    let needle = query.to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    let mut results = Vec::new();

    let periods = [
        &data.data.all_time.data,
        &data.data.monthly.data,
        &data.data.weekly.data,
        &data.data.today.data,
    ];

    for period in periods {
        for entry in period.iter() {
            if results.len() >= SEARCH_LIMIT {
                return results;
            }
            if entry.name.to_lowercase().contains(&needle) && seen.insert(entry.uid.clone()) {
                results.push(entry.clone());
            }
        }
    }

    results
}

// ==================== API HANDLERS ====================

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub username: Option<String>,
}

pub async fn affiliate_stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    let data = stats::fetch_stats_bounded(&state).await?;

    if let Some(username) = query.username.as_deref().filter(|u| !u.trim().is_empty()) {
        let periods = [
            &data.data.all_time.data,
            &data.data.monthly.data,
            &data.data.weekly.data,
            &data.data.today.data,
        ];
        let entry = periods
            .iter()
            .find_map(|period| period.iter().find(|e| e.name == username))
            .ok_or_else(|| AppError::NotFound(format!("player {}", username)))?;

        return Ok(Json(json!({
            "status": "success",
            "data": entry,
        })));
    }

    Ok(Json(json!({
        "status": "success",
        "metadata": data.metadata,
        "data": data.data,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    let needle = query.q.trim();
    if needle.is_empty() {
        return Err(AppError::BadRequest("query must not be empty".to_string()));
    }

    let data = stats::fetch_stats_bounded(&state).await?;
    let results = search(&data, needle);

    Ok(Json(json!({
        "status": "success",
        "results": results,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uid: &str, name: &str, totals: [f64; 4]) -> Value {
        json!({
            "uid": uid,
            "name": name,
            "wagered": {
                "today": totals[0],
                "this_week": totals[1],
                "this_month": totals[2],
                "all_time": totals[3],
            }
        })
    }

    fn sample_data() -> LeaderboardData {
        transform_leaderboard(&json!({
            "data": [
                entry("u1", "Annabel", [10.0, 50.0, 200.0, 1000.0]),
                entry("u2", "Hannah", [30.0, 20.0, 400.0, 900.0]),
                entry("u3", "Marcus", [0.0, 80.0, 100.0, 1500.0]),
                entry("u4", "joanna", [5.0, 5.0, 50.0, 100.0]),
            ]
        }))
    }

    #[test]
    fn periods_sort_descending_independently() {
        let data = sample_data();

        let monthly: Vec<&str> = data
            .data
            .monthly
            .data
            .iter()
            .map(|e| e.uid.as_str())
            .collect();
        assert_eq!(monthly, vec!["u2", "u1", "u3", "u4"]);

        let all_time: Vec<&str> = data
            .data
            .all_time
            .data
            .iter()
            .map(|e| e.uid.as_str())
            .collect();
        assert_eq!(all_time, vec!["u3", "u1", "u2", "u4"]);
    }

    #[test]
    fn zero_wagers_are_dropped_per_period() {
        let data = sample_data();

        // u3 wagered nothing today and so only disappears from that window.
        assert!(find_by_uid(&data.data.today.data, "u3").is_none());
        assert!(find_by_uid(&data.data.weekly.data, "u3").is_some());
    }

    #[test]
    fn stable_sort_keeps_feed_order_on_ties() {
        let data = transform_leaderboard(&json!([
            entry("a", "First", [1.0, 1.0, 100.0, 100.0]),
            entry("b", "Second", [1.0, 1.0, 100.0, 100.0]),
        ]));

        let monthly: Vec<&str> = data
            .data
            .monthly
            .data
            .iter()
            .map(|e| e.uid.as_str())
            .collect();
        assert_eq!(monthly, vec!["a", "b"]);
    }

    #[test]
    fn tolerates_feed_shape_drift() {
        // Entry array under `results`.
        let data = transform_leaderboard(&json!({
            "results": [entry("u1", "Ann", [1.0, 1.0, 1.0, 1.0])]
        }));
        assert_eq!(data.metadata.total_users, 1);

        // Bare single object.
        let data = transform_leaderboard(&entry("u1", "Ann", [1.0, 1.0, 1.0, 1.0]));
        assert_eq!(data.metadata.total_users, 1);

        // Top-level array.
        let data = transform_leaderboard(&json!([entry("u1", "Ann", [1.0, 1.0, 1.0, 1.0])]));
        assert_eq!(data.metadata.total_users, 1);

        // Not a leaderboard at all.
        let data = transform_leaderboard(&json!("nope"));
        assert_eq!(data.metadata.total_users, 0);
    }

    #[test]
    fn entries_without_wager_object_are_skipped() {
        let data = transform_leaderboard(&json!({
            "data": [
                {"uid": "u1", "name": "NoWagers"},
                entry("u2", "Ann", [1.0, 2.0, 3.0, 4.0]),
            ]
        }));
        assert_eq!(data.metadata.total_users, 1);
        assert_eq!(data.data.all_time.data[0].uid, "u2");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let data = transform_leaderboard(&json!({
            "data": [{"wagered": {"all_time": 5.0}}]
        }));
        let entry = &data.data.all_time.data[0];
        assert_eq!(entry.uid, "");
        assert_eq!(entry.name, "Anonymous");
        assert_eq!(entry.wagered.this_month, 0.0);
        assert_eq!(entry.wagered.all_time, 5.0);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let data = sample_data();
        let results = search(&data, "ann");

        let names: Vec<&str> = results.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Annabel"));
        assert!(names.contains(&"Hannah"));
        assert!(names.contains(&"joanna"));
        assert!(!names.contains(&"Marcus"));
    }

    #[test]
    fn search_dedupes_by_uid_across_periods() {
        let data = sample_data();
        let results = search(&data, "annabel");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uid, "u1");
    }

    #[test]
    fn search_caps_results() {
        let rows: Vec<Value> = (0..30)
            .map(|i| {
                entry(
                    &format!("u{}", i),
                    &format!("Player{}", i),
                    [1.0, 1.0, 1.0, 1.0],
                )
            })
            .collect();
        let data = transform_leaderboard(&json!({ "data": rows }));

        let results = search(&data, "player");
        assert_eq!(results.len(), SEARCH_LIMIT);
    }

    #[test]
    fn search_scans_all_time_first() {
        // u9 only wagered today; u1 only all-time. The all_time period is
        // scanned first, so u1 comes back ahead of u9.
        let data = transform_leaderboard(&json!({
            "data": [
                entry("u9", "Racer", [10.0, 0.0, 0.0, 0.0]),
                entry("u1", "Racer Two", [0.0, 0.0, 0.0, 10.0]),
            ]
        }));

        let results = search(&data, "racer");
        assert_eq!(results[0].uid, "u1");
        assert_eq!(results[1].uid, "u9");
    }

    #[test]
    fn period_for_race_type() {
        assert_eq!(PeriodKey::for_race_type("monthly"), PeriodKey::Monthly);
        assert_eq!(PeriodKey::for_race_type("weekly"), PeriodKey::Weekly);
        assert_eq!(PeriodKey::for_race_type("weekend"), PeriodKey::Weekly);
        assert_eq!(PeriodKey::for_race_type("anything"), PeriodKey::Monthly);
    }
}
