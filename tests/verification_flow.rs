// Integration tests for report comparison, dispute resolution, and the
// rating/reputation side effects they trigger.

mod common;

use chrono::{Duration, Utc};

use common::{played_match, report, test_db, two_teams, OWNER_A, OWNER_B};
use pitchside_backend::allocator;
use pitchside_backend::config::{DisputeExpiryPolicy, EngineConfig};
use pitchside_backend::db::Database;
use pitchside_backend::error::{CoreError, ErrorKind};
use pitchside_backend::metrics;
use pitchside_backend::roster::{MatchFormat, Roster, Side};
use pitchside_backend::verification::{self, MatchStatus, ReportClaim, ResolveAction};

const REFEREE: i64 = 999;

#[tokio::test]
async fn test_agreeing_reports_verify_and_rate_once() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    db.import_team_rating(a.id, 1000, 10, 2, 0).await.unwrap();
    db.import_team_rating(b.id, 1000, 10, 0, 0).await.unwrap();
    let m = played_match(&db, &a, &b).await;

    let first = report(&db, &cfg, OWNER_A, m.id, a.id, 3, 1).await.unwrap();
    assert_eq!(first.status, MatchStatus::Pending);
    assert!(first.ratings.is_empty());
    assert_eq!(
        db.get_match(m.id).await.unwrap().unwrap().status,
        "PENDING"
    );

    let second = report(&db, &cfg, OWNER_B, m.id, b.id, 3, 1).await.unwrap();
    assert_eq!(second.status, MatchStatus::Verified);
    assert_eq!(second.ratings.len(), 2);
    assert_eq!(second.ratings[0].computation.delta, 22);
    assert_eq!(second.ratings[1].computation.delta, -20);

    let a_after = db.get_team(a.id).await.unwrap().unwrap();
    let b_after = db.get_team(b.id).await.unwrap().unwrap();
    assert_eq!(a_after.elo, 1022);
    assert_eq!(b_after.elo, 980);
    assert_eq!(a_after.match_count, 11);
    assert_eq!(b_after.match_count, 11);
    assert_eq!((a_after.win_streak, a_after.loss_streak), (3, 0));
    assert_eq!((b_after.win_streak, b_after.loss_streak), (0, 1));

    let stored = db.get_match(m.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "VERIFIED");
    assert_eq!((stored.score_a, stored.score_b), (Some(3), Some(1)));
    assert!(stored.verified_at.is_some());

    let history = db.history_for_match(m.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let a_entry = history.iter().find(|h| h.team_id == a.id).unwrap();
    assert_eq!(a_entry.outcome, "win");
    assert_eq!((a_entry.elo_before, a_entry.elo_after), (1000, 1022));
    assert!((a_entry.streak_factor - 1.10).abs() < 1e-9);
    assert!((a_entry.expected - 0.5).abs() < 1e-9);
    assert_eq!(a_entry.k_factor, 40.0);

    // Reports are gone once the match is closed
    assert!(db.get_reports(m.id).await.unwrap().is_empty());

    // A terminal match accepts nothing further
    let err = report(&db, &cfg, OWNER_A, m.id, a.id, 3, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_provisional_draw_leaves_rating_unchanged() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    db.import_team_rating(a.id, 1000, 2, 0, 0).await.unwrap();
    let m = played_match(&db, &a, &b).await;

    report(&db, &cfg, OWNER_A, m.id, a.id, 1, 1).await.unwrap();
    let out = report(&db, &cfg, OWNER_B, m.id, b.id, 1, 1).await.unwrap();
    assert_eq!(out.status, MatchStatus::Verified);
    assert_eq!(out.ratings[0].computation.k_factor, 60.0);
    assert_eq!(out.ratings[0].computation.delta, 0);
    assert_eq!(db.get_team(a.id).await.unwrap().unwrap().elo, 1000);
}

#[tokio::test]
async fn test_disagreement_opens_dispute_then_agree_a() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    report(&db, &cfg, OWNER_A, m.id, a.id, 2, 1).await.unwrap();
    let before = Utc::now();
    let out = report(&db, &cfg, OWNER_B, m.id, b.id, 1, 2).await.unwrap();
    assert_eq!(out.status, MatchStatus::Disputed);
    let deadline = out.dispute_deadline.unwrap();
    assert!(deadline >= before + Duration::hours(47));
    assert!(deadline <= Utc::now() + Duration::hours(49));

    // No rating change while disputed
    let a_mid = db.get_team(a.id).await.unwrap().unwrap();
    assert_eq!((a_mid.elo, a_mid.match_count), (1000, 0));
    assert_eq!(db.get_reports(m.id).await.unwrap().len(), 2);

    // Further reports are refused until resolution
    let err = report(&db, &cfg, OWNER_A, m.id, a.id, 2, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Someone with no role in either team cannot resolve
    let err = verification::resolve_dispute(&db, &cfg, 5, false, m.id, ResolveAction::AgreeA, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    let resolved = verification::resolve_dispute(
        &db,
        &cfg,
        OWNER_A,
        false,
        m.id,
        ResolveAction::AgreeA,
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, MatchStatus::Verified);

    let stored = db.get_match(m.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "VERIFIED");
    assert_eq!((stored.score_a, stored.score_b), (Some(2), Some(1)));
    // Provisional K=60, equal strength: 60 * 0.5 = 30
    assert_eq!(db.get_team(a.id).await.unwrap().unwrap().elo, 1030);
    assert_eq!(db.get_team(b.id).await.unwrap().unwrap().elo, 970);

    let err = verification::resolve_dispute(
        &db,
        &cfg,
        OWNER_B,
        false,
        m.id,
        ResolveAction::Invalid,
        Utc::now(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_resolving_undisputed_match_is_conflict() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    let err = verification::resolve_dispute(&db, &cfg, REFEREE, true, m.id, ResolveAction::AgreeB, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = verification::resolve_dispute(&db, &cfg, REFEREE, true, 404, ResolveAction::AgreeB, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_disagreement_resolved_for_team_b() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    report(&db, &cfg, OWNER_A, m.id, a.id, 2, 1).await.unwrap();
    report(&db, &cfg, OWNER_B, m.id, b.id, 1, 2).await.unwrap();

    let resolved = verification::resolve_dispute(
        &db,
        &cfg,
        OWNER_B,
        false,
        m.id,
        ResolveAction::AgreeB,
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, MatchStatus::Verified);

    // Team B's claim is taken as reported, still in match orientation
    let stored = db.get_match(m.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "VERIFIED");
    assert_eq!((stored.score_a, stored.score_b), (Some(1), Some(2)));
    assert_eq!(db.get_team(a.id).await.unwrap().unwrap().elo, 970);
    assert_eq!(db.get_team(b.id).await.unwrap().unwrap().elo, 1030);

    let history = db.history_for_match(m.id).await.unwrap();
    let a_entry = history.iter().find(|h| h.team_id == a.id).unwrap();
    assert_eq!(a_entry.outcome, "loss");
    assert_eq!((a_entry.score_for, a_entry.score_against), (1, 2));
    let b_entry = history.iter().find(|h| h.team_id == b.id).unwrap();
    assert_eq!(b_entry.outcome, "win");
    assert_eq!((b_entry.score_for, b_entry.score_against), (2, 1));
}

#[tokio::test]
async fn test_unrepresentable_dispute_window_fails_cleanly() {
    let db = test_db().await;
    let mut cfg = EngineConfig::default();
    cfg.dispute.window_hours = i64::MAX / 2;
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    report(&db, &cfg, OWNER_A, m.id, a.id, 2, 1).await.unwrap();
    let err = report(&db, &cfg, OWNER_B, m.id, b.id, 1, 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    let stored = db.get_match(m.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "PENDING");
    assert!(stored.dispute_deadline.is_none());
    assert_eq!(db.get_reports(m.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_report_rejected() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    db.add_team_member(a.id, 101, "member").await.unwrap();
    let m = played_match(&db, &a, &b).await;

    report(&db, &cfg, OWNER_A, m.id, a.id, 2, 2).await.unwrap();
    let err = report(&db, &cfg, 101, m.id, a.id, 2, 2).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyReported));
    assert_eq!(db.get_reports(m.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_report_authorization_and_validation() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let outsider = db.create_team("Outsiders", 300, 1000, 100).await.unwrap();
    db.add_team_member(a.id, 102, "member").await.unwrap();
    db.set_member_active(a.id, 102, false).await.unwrap();
    let m = played_match(&db, &a, &b).await;

    // Team not in the match
    let err = report(&db, &cfg, 300, m.id, outsider.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    // Not a member / inactive member
    let err = report(&db, &cfg, OWNER_B, m.id, a.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));
    let err = report(&db, &cfg, 102, m.id, a.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    // Out-of-range scores
    let err = report(&db, &cfg, OWNER_A, m.id, a.id, -1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));
    let err = report(&db, &cfg, OWNER_A, m.id, a.id, 0, 100).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));

    // Unknown match
    let err = report(&db, &cfg, OWNER_A, 404, a.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    // Before kickoff
    let future = db
        .create_match(
            MatchFormat::FiveASide,
            Some(a.id),
            Some(b.id),
            Utc::now() + Duration::hours(3),
            &Roster::from_template(MatchFormat::FiveASide, 0),
        )
        .await
        .unwrap();
    let err = report(&db, &cfg, OWNER_A, future.id, a.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));

    assert_eq!(db.get_match(m.id).await.unwrap().unwrap().status, "UNREPORTED");
}

#[tokio::test]
async fn test_failed_verification_rolls_back_everything() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    sqlx::query(&format!(
        "CREATE TRIGGER fail_history BEFORE INSERT ON rating_history WHEN NEW.team_id = {} BEGIN SELECT RAISE(ABORT, 'history write failed'); END",
        b.id
    ))
    .execute(db.pool())
    .await
    .unwrap();

    report(&db, &cfg, OWNER_A, m.id, a.id, 4, 0).await.unwrap();
    let err = report(&db, &cfg, OWNER_B, m.id, b.id, 4, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    // Team A's update happened first inside the transaction; none of it stuck
    let a_after = db.get_team(a.id).await.unwrap().unwrap();
    assert_eq!((a_after.elo, a_after.match_count, a_after.win_streak), (1000, 0, 0));
    assert!(db.history_for_match(m.id).await.unwrap().is_empty());
    let stored = db.get_match(m.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "PENDING");
    assert_eq!(db.get_reports(m.id).await.unwrap().len(), 1);

    sqlx::query("DROP TRIGGER fail_history")
        .execute(db.pool())
        .await
        .unwrap();
    let out = report(&db, &cfg, OWNER_B, m.id, b.id, 4, 0).await.unwrap();
    assert_eq!(out.status, MatchStatus::Verified);
    assert_eq!(db.history_for_match(m.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_resolutions_drain_reputation_and_block_reporting() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;

    let mut warned = false;
    for round in 0..5 {
        let m = played_match(&db, &a, &b).await;
        let first = report(&db, &cfg, OWNER_A, m.id, a.id, 1, 0).await.unwrap();
        warned |= first.warning.is_some();
        report(&db, &cfg, OWNER_B, m.id, b.id, 0, 1).await.unwrap();

        let out = verification::resolve_dispute(
            &db,
            &cfg,
            REFEREE,
            true,
            m.id,
            ResolveAction::Invalid,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(out.status, MatchStatus::Invalid);
        assert_eq!(out.reputation.len(), 2);
        let expected = 100 - 15 * (round + 1);
        assert!(out.reputation.iter().all(|r| r.after == expected));
        assert_eq!(db.get_match(m.id).await.unwrap().unwrap().status, "INVALID");
    }
    assert!(warned, "reports in the warning band carry a warning");

    let team = db.get_team(a.id).await.unwrap().unwrap();
    assert_eq!(team.reputation, 25);
    assert_eq!(team.elo, 1000);
    let events = db.reputation_events(a.id).await.unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e.delta == -15 && e.reason == "dispute_invalid"));

    let m = played_match(&db, &a, &b).await;
    let err = report(&db, &cfg, OWNER_A, m.id, a.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));
}

#[tokio::test]
async fn test_reputation_never_below_floor() {
    let db = test_db().await;
    let mut cfg = EngineConfig::default();
    cfg.reputation.invalid_penalty = 70;
    cfg.reputation.block_threshold = -1;
    cfg.reputation.warning_threshold = -1;
    let (a, b) = two_teams(&db).await;

    for _ in 0..3 {
        let m = played_match(&db, &a, &b).await;
        report(&db, &cfg, OWNER_A, m.id, a.id, 1, 0).await.unwrap();
        report(&db, &cfg, OWNER_B, m.id, b.id, 0, 1).await.unwrap();
        verification::resolve_dispute(&db, &cfg, REFEREE, true, m.id, ResolveAction::Invalid, Utc::now())
            .await
            .unwrap();
        let rep = db.get_team(a.id).await.unwrap().unwrap().reputation;
        assert!(rep >= cfg.reputation.floor);
    }
    assert_eq!(db.get_team(a.id).await.unwrap().unwrap().reputation, 0);
}

#[tokio::test]
async fn test_lineups_feed_consistency() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;

    // Same two starters every week: only 2 core players out of 5
    for _ in 0..3 {
        let m = played_match(&db, &a, &b).await;
        allocator::join(&db, m.id, 1, Some("GK"), Some(Side::A)).await.unwrap();
        allocator::join(&db, m.id, 2, Some("ST"), Some(Side::A)).await.unwrap();
        report(&db, &cfg, OWNER_A, m.id, a.id, 1, 1).await.unwrap();
        report(&db, &cfg, OWNER_B, m.id, b.id, 1, 1).await.unwrap();
    }

    let m = played_match(&db, &a, &b).await;
    report(&db, &cfg, OWNER_A, m.id, a.id, 2, 0).await.unwrap();
    let out = report(&db, &cfg, OWNER_B, m.id, b.id, 2, 0).await.unwrap();
    let a_calc = &out.ratings[0].computation;
    assert!((a_calc.consistency - 0.4).abs() < 1e-9);
    // Team B never fielded anyone: no lineup history, no penalty
    let b_calc = &out.ratings[1].computation;
    assert!((b_calc.consistency - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_position_scores_shift_expectation() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;

    for (player, position) in [(1, "GK"), (2, "DEF"), (3, "ST")] {
        allocator::join(&db, m.id, player, Some(position), Some(Side::A)).await.unwrap();
        db.record_position_score(player, position, 8.0, Utc::now()).await.unwrap();
    }
    for (player, position) in [(4, "GK"), (5, "DEF"), (6, "ST")] {
        allocator::join(&db, m.id, player, Some(position), Some(Side::B)).await.unwrap();
        db.record_position_score(player, position, 4.0, Utc::now()).await.unwrap();
    }

    report(&db, &cfg, OWNER_A, m.id, a.id, 1, 0).await.unwrap();
    let out = report(&db, &cfg, OWNER_B, m.id, b.id, 1, 0).await.unwrap();
    let a_calc = &out.ratings[0].computation;
    let b_calc = &out.ratings[1].computation;
    assert!((a_calc.team_rating - 8.0).abs() < 1e-9);
    assert!((b_calc.team_rating - 4.0).abs() < 1e-9);
    assert!((a_calc.influence_factor - 2.0).abs() < 1e-9);
    assert!(a_calc.expected > 0.5);
    // The favourite gains less than an even match would give
    assert!(a_calc.delta < 30);
    assert!(b_calc.delta > -30);
}

#[tokio::test]
async fn test_report_listing_visibility() {
    let db = test_db().await;
    let cfg = EngineConfig::default();
    let (a, b) = two_teams(&db).await;
    let m = played_match(&db, &a, &b).await;
    report(&db, &cfg, OWNER_A, m.id, a.id, 1, 0).await.unwrap();

    let seen = verification::list_reports(&db, OWNER_B, false, m.id).await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].reporter_role, "owner");
    assert!(verification::list_reports(&db, REFEREE, true, m.id).await.is_ok());
    assert!(matches!(
        verification::list_reports(&db, 5, false, m.id).await,
        Err(CoreError::Forbidden(_))
    ));
}

async fn open_dispute(db: &Database, cfg: &EngineConfig, team_a: i64, team_b: i64, match_id: i64) {
    let claims = [
        ReportClaim { match_id, team_id: team_a, reporter_id: OWNER_A, score_a: 3, score_b: 0 },
        ReportClaim { match_id, team_id: team_b, reporter_id: OWNER_B, score_a: 0, score_b: 3 },
    ];
    for claim in claims {
        verification::submit_report(db, cfg, claim, Utc::now()).await.unwrap();
    }
}

#[tokio::test]
async fn test_expiry_policies() {
    let db = test_db().await;
    let (a, b) = two_teams(&db).await;
    let manual = EngineConfig::default();

    let m1 = played_match(&db, &a, &b).await;
    open_dispute(&db, &manual, a.id, b.id, m1.id).await;
    let later = Utc::now() + Duration::hours(49);

    // Manual: nothing happens, even long after the deadline
    assert!(verification::expire_dispute(&db, &manual, m1.id, later).await.unwrap().is_none());
    assert_eq!(verification::sweep_expired_disputes(&db, &manual, later).await.unwrap(), 0);
    assert_eq!(db.get_match(m1.id).await.unwrap().unwrap().status, "DISPUTED");

    // Accept first report: team A reported first
    let mut accept_first = manual.clone();
    accept_first.dispute.expiry_policy = DisputeExpiryPolicy::AcceptFirstReport;
    assert_eq!(
        verification::sweep_expired_disputes(&db, &accept_first, Utc::now()).await.unwrap(),
        0,
        "deadline not reached yet"
    );
    let expired_before = metrics::MATCHES_VERIFIED_TOTAL.with_label_values(&["expiry"]).get();
    assert_eq!(verification::sweep_expired_disputes(&db, &accept_first, later).await.unwrap(), 1);
    assert_eq!(
        metrics::MATCHES_VERIFIED_TOTAL.with_label_values(&["expiry"]).get(),
        expired_before + 1
    );
    let stored = db.get_match(m1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "VERIFIED");
    assert_eq!((stored.score_a, stored.score_b), (Some(3), Some(0)));

    // Invalidate
    let m2 = played_match(&db, &a, &b).await;
    open_dispute(&db, &manual, a.id, b.id, m2.id).await;
    let mut invalidate = manual.clone();
    invalidate.dispute.expiry_policy = DisputeExpiryPolicy::Invalidate;
    let out = verification::expire_dispute(&db, &invalidate, m2.id, later)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out.status, MatchStatus::Invalid);
    assert_eq!(db.get_team(b.id).await.unwrap().unwrap().reputation, 85);
}
