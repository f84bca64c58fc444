// Database Module
// Pool construction plus first-run DDL for the two tables the engine owns.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const WAGER_RACES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS wager_races (
    id VARCHAR(10) PRIMARY KEY,
    title TEXT NOT NULL,
    race_type TEXT NOT NULL DEFAULT 'monthly',
    status TEXT NOT NULL DEFAULT 'upcoming',
    start_date TIMESTAMPTZ NOT NULL,
    end_date TIMESTAMPTZ NOT NULL,
    prize_pool DOUBLE PRECISION NOT NULL DEFAULT 0,
    min_wager DOUBLE PRECISION NOT NULL DEFAULT 0,
    prize_distribution JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

const WAGER_RACE_PARTICIPANTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS wager_race_participants (
    id SERIAL PRIMARY KEY,
    race_id VARCHAR(10) NOT NULL REFERENCES wager_races(id),
    uid VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    wagered DOUBLE PRECISION NOT NULL,
    position INTEGER NOT NULL,
    previous_position INTEGER,
    prize_amount DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (race_id, uid)
)";

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    for ddl in [WAGER_RACES_DDL, WAGER_RACE_PARTICIPANTS_DDL] {
        sqlx::query(ddl).execute(&pool).await?;
    }

    Ok(pool)
}
