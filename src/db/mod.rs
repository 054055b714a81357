// Database access layer (SQLite via sqlx).
//
// Pool-level methods on `Database` are for plain reads and setup. Functions
// taking `&mut SqliteConnection` are the building blocks of the engine's
// transactions and must be called on the transaction's connection.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::roster::{MatchFormat, Roster};

pub type Tx = Transaction<'static, Sqlite>;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub elo: i32,
    pub match_count: i32,
    pub win_streak: i32,
    pub loss_streak: i32,
    #[serde(skip_serializing)]
    pub reputation: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMember {
    pub team_id: i64,
    pub player_id: i64,
    pub role: String,
    pub active: bool,
}

impl TeamMember {
    pub fn is_elevated(&self) -> bool {
        self.active && (self.role == "owner" || self.role == "admin")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchRow {
    pub id: i64,
    pub format: String,
    pub team_a_id: Option<i64>,
    pub team_b_id: Option<i64>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub roster: String,
    pub roster_rev: i64,
    pub status: String,
    pub score_a: Option<i32>,
    pub score_b: Option<i32>,
    pub dispute_deadline: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MatchRow {
    pub fn match_format(&self) -> Option<MatchFormat> {
        MatchFormat::from_str_name(&self.format)
    }

    pub fn parsed_roster(&self) -> Result<Roster, crate::error::CoreError> {
        Roster::parse(&self.roster, self.match_format())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchReport {
    pub id: String,
    pub match_id: i64,
    pub team_id: i64,
    pub reporter_id: i64,
    pub reporter_role: String,
    pub score_a: i32,
    pub score_b: i32,
    /// Reported while the team's reputation was in the warning band.
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RatingHistoryEntry {
    pub id: String,
    pub team_id: i64,
    pub match_id: i64,
    pub opponent_id: i64,
    pub outcome: String,
    pub score_for: i32,
    pub score_against: i32,
    pub elo_before: i32,
    pub elo_after: i32,
    pub delta: i32,
    pub opponent_elo: i32,
    pub team_rating: f64,
    pub opponent_team_rating: f64,
    pub influence_factor: f64,
    pub adjusted_elo: f64,
    pub opponent_adjusted_elo: f64,
    pub expected: f64,
    pub consistency: f64,
    pub streak_factor: f64,
    pub k_factor: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub team_id: i64,
    pub name: String,
    pub elo: i32,
    pub match_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReputationEvent {
    pub id: i64,
    pub team_id: i64,
    pub match_id: Option<i64>,
    pub delta: i32,
    pub score_after: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub wins: i64,
    pub draws: i64,
    pub losses: i64,
}

const TEAM_COLUMNS: &str =
    "id, name, elo, match_count, win_streak, loss_streak, reputation, created_at";
const MATCH_COLUMNS: &str = "id, format, team_a_id, team_b_id, scheduled_at, roster, roster_rev, status, score_a, score_b, dispute_deadline, verified_at, created_at";
const REPORT_COLUMNS: &str =
    "id, match_id, team_id, reporter_id, reporter_role, score_a, score_b, flagged, created_at";
const HISTORY_COLUMNS: &str = "id, team_id, match_id, opponent_id, outcome, score_for, score_against, elo_before, elo_after, delta, opponent_elo, team_rating, opponent_team_rating, influence_factor, adjusted_elo, opponent_adjusted_elo, expected, consistency, streak_factor, k_factor, created_at";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        let normalized = db.migrate_rosters().await?;
        if normalized > 0 {
            tracing::info!(count = normalized, "Normalized legacy match rosters");
        }
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction that holds the write lock from its first statement,
    /// so everything read inside it is still current at commit time.
    pub async fn begin_immediate(&self) -> Result<Tx, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                elo INTEGER NOT NULL,
                match_count INTEGER NOT NULL DEFAULT 0,
                win_streak INTEGER NOT NULL DEFAULT 0,
                loss_streak INTEGER NOT NULL DEFAULT 0,
                reputation INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS team_members (
                team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                player_id INTEGER NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                active INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (team_id, player_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                format TEXT NOT NULL,
                team_a_id INTEGER REFERENCES teams(id),
                team_b_id INTEGER REFERENCES teams(id),
                scheduled_at TEXT NOT NULL,
                roster TEXT NOT NULL,
                roster_rev INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'UNREPORTED',
                score_a INTEGER,
                score_b INTEGER,
                dispute_deadline TEXT,
                verified_at TEXT,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS match_reports (
                id TEXT PRIMARY KEY,
                match_id INTEGER NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                reporter_id INTEGER NOT NULL,
                reporter_role TEXT NOT NULL,
                score_a INTEGER NOT NULL,
                score_b INTEGER NOT NULL,
                flagged INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(match_id, team_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rating_history (
                id TEXT PRIMARY KEY,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                match_id INTEGER NOT NULL REFERENCES matches(id),
                opponent_id INTEGER NOT NULL REFERENCES teams(id),
                outcome TEXT NOT NULL,
                score_for INTEGER NOT NULL,
                score_against INTEGER NOT NULL,
                elo_before INTEGER NOT NULL,
                elo_after INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                opponent_elo INTEGER NOT NULL,
                team_rating REAL NOT NULL,
                opponent_team_rating REAL NOT NULL,
                influence_factor REAL NOT NULL,
                adjusted_elo REAL NOT NULL,
                opponent_adjusted_elo REAL NOT NULL,
                expected REAL NOT NULL,
                consistency REAL NOT NULL,
                streak_factor REAL NOT NULL,
                k_factor REAL NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(team_id, match_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS match_lineups (
                match_id INTEGER NOT NULL REFERENCES matches(id),
                team_id INTEGER NOT NULL REFERENCES teams(id),
                player_id INTEGER NOT NULL,
                position TEXT NOT NULL,
                PRIMARY KEY (match_id, team_id, player_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_preferences (
                player_id INTEGER NOT NULL,
                rank INTEGER NOT NULL,
                position TEXT NOT NULL,
                PRIMARY KEY (player_id, rank)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL,
                position TEXT NOT NULL,
                score REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reputation_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                match_id INTEGER REFERENCES matches(id),
                delta INTEGER NOT NULL,
                score_after INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_position_scores_player ON position_scores(player_id, recorded_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rating_history_team ON rating_history(team_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrite every roster that is not in canonical versioned form.
    /// Returns the number of rows rewritten; a second run returns 0.
    pub async fn migrate_rosters(&self) -> Result<usize, sqlx::Error> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, format, roster FROM matches ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        let mut rewritten = 0;
        for (id, format, raw) in rows {
            if Roster::is_canonical(&raw) {
                continue;
            }
            let roster = match Roster::parse(&raw, MatchFormat::from_str_name(&format)) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(match_id = id, error = %e, "Skipping unreadable roster");
                    continue;
                }
            };
            sqlx::query("UPDATE matches SET roster = ?, roster_rev = roster_rev + 1 WHERE id = ?")
                .bind(roster.to_json())
                .bind(id)
                .execute(&self.pool)
                .await?;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    // ── Teams ─────────────────────────────────────────────────────────

    pub async fn create_team(
        &self,
        name: &str,
        owner_id: i64,
        starting_elo: i32,
        reputation: i32,
    ) -> Result<Team, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let team = sqlx::query_as::<_, Team>(&format!(
            "INSERT INTO teams (name, elo, reputation, created_at) VALUES (?, ?, ?, ?) RETURNING {TEAM_COLUMNS}"
        ))
        .bind(name)
        .bind(starting_elo)
        .bind(reputation)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        upsert_member(&mut tx, team.id, owner_id, "owner").await?;
        tx.commit().await?;
        Ok(team)
    }

    pub async fn get_team(&self, id: i64) -> Result<Option<Team>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_team(&mut conn, id).await
    }

    /// Seed a team's rating state, e.g. when importing an existing league.
    pub async fn import_team_rating(
        &self,
        team_id: i64,
        elo: i32,
        match_count: i32,
        win_streak: i32,
        loss_streak: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE teams SET elo = ?, match_count = ?, win_streak = ?, loss_streak = ? WHERE id = ?",
        )
        .bind(elo)
        .bind(match_count)
        .bind(win_streak)
        .bind(loss_streak)
        .bind(team_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_team_member(
        &self,
        team_id: i64,
        player_id: i64,
        role: &str,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        upsert_member(&mut conn, team_id, player_id, role).await
    }

    pub async fn set_member_active(
        &self,
        team_id: i64,
        player_id: i64,
        active: bool,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE team_members SET active = ? WHERE team_id = ? AND player_id = ?")
                .bind(active)
                .bind(team_id)
                .bind(player_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_member(
        &self,
        team_id: i64,
        player_id: i64,
    ) -> Result<Option<TeamMember>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_member(&mut conn, team_id, player_id).await
    }

    // ── Matches ───────────────────────────────────────────────────────

    pub async fn create_match(
        &self,
        format: MatchFormat,
        team_a_id: Option<i64>,
        team_b_id: Option<i64>,
        scheduled_at: DateTime<Utc>,
        roster: &Roster,
    ) -> Result<MatchRow, sqlx::Error> {
        sqlx::query_as::<_, MatchRow>(&format!(
            "INSERT INTO matches (format, team_a_id, team_b_id, scheduled_at, roster, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING {MATCH_COLUMNS}"
        ))
        .bind(format.as_str())
        .bind(team_a_id)
        .bind(team_b_id)
        .bind(scheduled_at)
        .bind(roster.to_json())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_match(&self, id: i64) -> Result<Option<MatchRow>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_match(&mut conn, id).await
    }

    /// Store a raw roster document as-is. Used to load rosters written by
    /// older clients before `migrate_rosters` runs.
    pub async fn put_raw_roster(&self, match_id: i64, raw: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE matches SET roster = ? WHERE id = ?")
            .bind(raw)
            .bind(match_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_disputed_matches(&self) -> Result<Vec<MatchRow>, sqlx::Error> {
        sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE status = 'DISPUTED' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_reports(&self, match_id: i64) -> Result<Vec<MatchReport>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_reports(&mut conn, match_id).await
    }

    // ── Positions ─────────────────────────────────────────────────────

    /// Replace a player's ranked position preferences (first = favourite).
    pub async fn set_position_preferences(
        &self,
        player_id: i64,
        positions: &[String],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM position_preferences WHERE player_id = ?")
            .bind(player_id)
            .execute(&mut *tx)
            .await?;
        for (rank, position) in positions
            .iter()
            .take(crate::roster::MAX_PREFERENCES)
            .enumerate()
        {
            sqlx::query(
                "INSERT INTO position_preferences (player_id, rank, position) VALUES (?, ?, ?)",
            )
            .bind(player_id)
            .bind(rank as i64 + 1)
            .bind(crate::roster::normalize_position(position))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn record_position_score(
        &self,
        player_id: i64,
        position: &str,
        score: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO position_scores (player_id, position, score, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(player_id)
        .bind(crate::roster::normalize_position(position))
        .bind(score)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Ratings ───────────────────────────────────────────────────────

    pub async fn rating_history(
        &self,
        team_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RatingHistoryEntry>, sqlx::Error> {
        sqlx::query_as::<_, RatingHistoryEntry>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM rating_history WHERE team_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(team_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn history_for_match(
        &self,
        match_id: i64,
    ) -> Result<Vec<RatingHistoryEntry>, sqlx::Error> {
        sqlx::query_as::<_, RatingHistoryEntry>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM rating_history WHERE match_id = ? ORDER BY rowid"
        ))
        .bind(match_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn outcome_counts(&self, team_id: i64) -> Result<OutcomeCounts, sqlx::Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT outcome, COUNT(*) FROM rating_history WHERE team_id = ? GROUP BY outcome",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = OutcomeCounts::default();
        for (outcome, n) in rows {
            match outcome.as_str() {
                "win" => counts.wins = n,
                "draw" => counts.draws = n,
                "loss" => counts.losses = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Teams by rating. Equal ratings share a rank.
    pub async fn leaderboard(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
        sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT (SELECT COUNT(*) FROM teams o WHERE o.elo > t.elo) + 1 AS rank,
                   t.id AS team_id, t.name, t.elo, t.match_count
            FROM teams t
            ORDER BY t.elo DESC, t.match_count DESC, t.id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// (rank, total teams) for one team.
    pub async fn team_rank(&self, team_id: i64) -> Result<Option<(i64, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT (SELECT COUNT(*) FROM teams o WHERE o.elo > t.elo) + 1,
                   (SELECT COUNT(*) FROM teams)
            FROM teams t WHERE t.id = ?
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn reputation_events(
        &self,
        team_id: i64,
    ) -> Result<Vec<ReputationEvent>, sqlx::Error> {
        sqlx::query_as::<_, ReputationEvent>(
            "SELECT id, team_id, match_id, delta, score_after, reason, created_at FROM reputation_events WHERE team_id = ? ORDER BY id",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
    }
}

// ── Connection-scoped building blocks ─────────────────────────────────

pub async fn fetch_team(conn: &mut SqliteConnection, id: i64) -> Result<Option<Team>, sqlx::Error> {
    sqlx::query_as::<_, Team>(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn fetch_member(
    conn: &mut SqliteConnection,
    team_id: i64,
    player_id: i64,
) -> Result<Option<TeamMember>, sqlx::Error> {
    sqlx::query_as::<_, TeamMember>(
        "SELECT team_id, player_id, role, active FROM team_members WHERE team_id = ? AND player_id = ?",
    )
    .bind(team_id)
    .bind(player_id)
    .fetch_optional(&mut *conn)
    .await
}

async fn upsert_member(
    conn: &mut SqliteConnection,
    team_id: i64,
    player_id: i64,
    role: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO team_members (team_id, player_id, role, active) VALUES (?, ?, ?, 1)
        ON CONFLICT(team_id, player_id) DO UPDATE SET role = excluded.role, active = 1
        "#,
    )
    .bind(team_id)
    .bind(player_id)
    .bind(role)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn fetch_match(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<MatchRow>, sqlx::Error> {
    sqlx::query_as::<_, MatchRow>(&format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

/// Conditional roster write: succeeds only if nobody wrote since `expected_rev`.
pub async fn write_roster(
    conn: &mut SqliteConnection,
    match_id: i64,
    roster: &Roster,
    expected_rev: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE matches SET roster = ?, roster_rev = roster_rev + 1 WHERE id = ? AND roster_rev = ?",
    )
    .bind(roster.to_json())
    .bind(match_id)
    .bind(expected_rev)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_match_status(
    conn: &mut SqliteConnection,
    match_id: i64,
    status: &str,
    dispute_deadline: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE matches SET status = ?, dispute_deadline = ? WHERE id = ?")
        .bind(status)
        .bind(dispute_deadline)
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn mark_match_verified(
    conn: &mut SqliteConnection,
    match_id: i64,
    score_a: i32,
    score_b: i32,
    verified_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE matches SET status = 'VERIFIED', score_a = ?, score_b = ?, verified_at = ? WHERE id = ?",
    )
    .bind(score_a)
    .bind(score_b)
    .bind(verified_at)
    .bind(match_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn position_preferences(
    conn: &mut SqliteConnection,
    player_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT position FROM position_preferences WHERE player_id = ? ORDER BY rank LIMIT 3",
    )
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await
}

/// Most recent scores first. `position = None` reads across all positions.
pub async fn recent_scores(
    conn: &mut SqliteConnection,
    player_id: i64,
    position: Option<&str>,
    limit: i64,
) -> Result<Vec<f64>, sqlx::Error> {
    match position {
        Some(pos) => {
            sqlx::query_scalar(
                "SELECT score FROM position_scores WHERE player_id = ? AND position = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
            )
            .bind(player_id)
            .bind(pos)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
        }
        None => {
            sqlx::query_scalar(
                "SELECT score FROM position_scores WHERE player_id = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
            )
            .bind(player_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
        }
    }
}

pub async fn fetch_reports(
    conn: &mut SqliteConnection,
    match_id: i64,
) -> Result<Vec<MatchReport>, sqlx::Error> {
    sqlx::query_as::<_, MatchReport>(&format!(
        "SELECT {REPORT_COLUMNS} FROM match_reports WHERE match_id = ? ORDER BY created_at, rowid"
    ))
    .bind(match_id)
    .fetch_all(&mut *conn)
    .await
}

pub async fn insert_report(
    conn: &mut SqliteConnection,
    report: &MatchReport,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO match_reports ({REPORT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&report.id)
    .bind(report.match_id)
    .bind(report.team_id)
    .bind(report.reporter_id)
    .bind(&report.reporter_role)
    .bind(report.score_a)
    .bind(report.score_b)
    .bind(report.flagged)
    .bind(report.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_reports(conn: &mut SqliteConnection, match_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM match_reports WHERE match_id = ?")
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn update_team_rating(
    conn: &mut SqliteConnection,
    team_id: i64,
    elo: i32,
    win_streak: u32,
    loss_streak: u32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE teams SET elo = ?, win_streak = ?, loss_streak = ?, match_count = match_count + 1 WHERE id = ?",
    )
    .bind(elo)
    .bind(win_streak)
    .bind(loss_streak)
    .bind(team_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_rating_history(
    conn: &mut SqliteConnection,
    entry: &RatingHistoryEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO rating_history ({HISTORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&entry.id)
    .bind(entry.team_id)
    .bind(entry.match_id)
    .bind(entry.opponent_id)
    .bind(&entry.outcome)
    .bind(entry.score_for)
    .bind(entry.score_against)
    .bind(entry.elo_before)
    .bind(entry.elo_after)
    .bind(entry.delta)
    .bind(entry.opponent_elo)
    .bind(entry.team_rating)
    .bind(entry.opponent_team_rating)
    .bind(entry.influence_factor)
    .bind(entry.adjusted_elo)
    .bind(entry.opponent_adjusted_elo)
    .bind(entry.expected)
    .bind(entry.consistency)
    .bind(entry.streak_factor)
    .bind(entry.k_factor)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_lineup(
    conn: &mut SqliteConnection,
    match_id: i64,
    team_id: i64,
    lineup: &[(i64, &str)],
) -> Result<(), sqlx::Error> {
    for (player_id, position) in lineup {
        sqlx::query(
            "INSERT OR IGNORE INTO match_lineups (match_id, team_id, player_id, position) VALUES (?, ?, ?, ?)",
        )
        .bind(match_id)
        .bind(team_id)
        .bind(player_id)
        .bind(position)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Lineups of the team's most recent verified matches, most recent first.
pub async fn recent_lineups(
    conn: &mut SqliteConnection,
    team_id: i64,
    window: i64,
) -> Result<Vec<Vec<i64>>, sqlx::Error> {
    let match_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT match_id FROM rating_history WHERE team_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(team_id)
    .bind(window)
    .fetch_all(&mut *conn)
    .await?;

    let mut lineups = Vec::with_capacity(match_ids.len());
    for match_id in match_ids {
        let players: Vec<i64> = sqlx::query_scalar(
            "SELECT player_id FROM match_lineups WHERE match_id = ? AND team_id = ? ORDER BY player_id",
        )
        .bind(match_id)
        .bind(team_id)
        .fetch_all(&mut *conn)
        .await?;
        lineups.push(players);
    }
    Ok(lineups)
}

pub async fn update_reputation(
    conn: &mut SqliteConnection,
    team_id: i64,
    reputation: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE teams SET reputation = ? WHERE id = ?")
        .bind(reputation)
        .bind(team_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_reputation_event(
    conn: &mut SqliteConnection,
    team_id: i64,
    match_id: Option<i64>,
    delta: i32,
    score_after: i32,
    reason: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO reputation_events (team_id, match_id, delta, score_after, reason, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(team_id)
    .bind(match_id)
    .bind(delta)
    .bind(score_after)
    .bind(reason)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
