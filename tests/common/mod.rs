// Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::{Duration, Utc};

use pitchside_backend::config::EngineConfig;
use pitchside_backend::db::{Database, MatchRow, Team};
use pitchside_backend::roster::{MatchFormat, Roster};
use pitchside_backend::verification::{self, ReportClaim, SubmitOutcome};
use pitchside_backend::error::CoreError;

/// Fresh file-backed database. Each pool connection sees the same data,
/// which an in-memory URL would not give us.
pub async fn test_db() -> Database {
    let path = std::env::temp_dir().join(format!("pitchside-it-{}.db", uuid::Uuid::new_v4()));
    Database::new(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap()
}

pub const OWNER_A: i64 = 100;
pub const OWNER_B: i64 = 200;

/// Two teams with default rating and full reputation, owned by OWNER_A/OWNER_B.
pub async fn two_teams(db: &Database) -> (Team, Team) {
    let cfg = EngineConfig::default();
    let a = db
        .create_team("Harbour FC", OWNER_A, cfg.rating.starting_elo, cfg.reputation.ceiling)
        .await
        .unwrap();
    let b = db
        .create_team("Quarry United", OWNER_B, cfg.rating.starting_elo, cfg.reputation.ceiling)
        .await
        .unwrap();
    (a, b)
}

/// A 5v5 match between the two teams that kicked off an hour ago.
pub async fn played_match(db: &Database, a: &Team, b: &Team) -> MatchRow {
    let roster = Roster::from_template(MatchFormat::FiveASide, 2);
    db.create_match(
        MatchFormat::FiveASide,
        Some(a.id),
        Some(b.id),
        Utc::now() - Duration::hours(1),
        &roster,
    )
    .await
    .unwrap()
}

pub async fn report(
    db: &Database,
    cfg: &EngineConfig,
    reporter_id: i64,
    match_id: i64,
    team_id: i64,
    score_a: i32,
    score_b: i32,
) -> Result<SubmitOutcome, CoreError> {
    verification::submit_report(
        db,
        cfg,
        ReportClaim {
            match_id,
            team_id,
            reporter_id,
            score_a,
            score_b,
        },
        Utc::now(),
    )
    .await
}
