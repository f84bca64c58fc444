// Race Scheduler
// Background loop driving the race lifecycle: promotes upcoming races,
// refreshes live standings from the cached leaderboard, and completes
// races past their end date. A failed tick is logged and skipped; the
// last good snapshot is never wiped by an upstream outage.

use chrono::Utc;

use crate::error::AppError;
use crate::leaderboard::PeriodKey;
use crate::races;
use crate::stats;
use crate::AppState;

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(state.config.refresh_interval);

    loop {
        interval.tick().await;
        if let Err(err) = tick(&state).await {
            tracing::warn!("scheduler tick failed: {}", err);
        }
    }
}

async fn tick(state: &AppState) -> Result<(), AppError> {
    races::advance_upcoming(&state.db).await?;

    let Some(race) = races::current_race(&state.db).await? else {
        tracing::debug!("no live race, nothing to refresh");
        return Ok(());
    };

    // One writer per race at a time: the lock keeps a refresh from
    // interleaving with an admin force-complete.
    let _guard = state.race_lock.lock().await;

    if Utc::now() >= race.end_date {
        // Completion works off the last snapshot and needs no fresh stats.
        races::complete_race(&state.db, &race.id, false).await?;
        return Ok(());
    }

    // On fetch failure this propagates and the tick is skipped: the
    // previous snapshot stays in place until the next attempt.
    let data = stats::fetch_stats(state).await?;
    let period = PeriodKey::for_race_type(&race.race_type);
    races::refresh_standings(&state.db, &race, data.data.get(period)).await?;

    Ok(())
}
