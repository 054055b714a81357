// Match verification: report intake, report comparison, dispute resolution,
// and the transaction that applies a verified result to both teams.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::config::{DisputeExpiryPolicy, EngineConfig};
use crate::db::{self, Database, MatchReport, MatchRow, RatingHistoryEntry, Team};
use crate::error::CoreError;
use crate::metrics;
use crate::rating::{self, RatingComputation, TeamSnapshot};
use crate::reputation;
use crate::roster::{Roster, Side, RESERVE_POSITION};

/// Highest goal count a report may carry.
pub const MAX_REPORTED_SCORE: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Unreported,
    Pending,
    Verified,
    Disputed,
    Invalid,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Unreported => "UNREPORTED",
            MatchStatus::Pending => "PENDING",
            MatchStatus::Verified => "VERIFIED",
            MatchStatus::Disputed => "DISPUTED",
            MatchStatus::Invalid => "INVALID",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "UNREPORTED" => Some(MatchStatus::Unreported),
            "PENDING" => Some(MatchStatus::Pending),
            "VERIFIED" => Some(MatchStatus::Verified),
            "DISPUTED" => Some(MatchStatus::Disputed),
            "INVALID" => Some(MatchStatus::Invalid),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: &MatchStatus) -> bool {
        self.valid_next_states().contains(to)
    }

    pub fn valid_next_states(&self) -> Vec<MatchStatus> {
        match self {
            MatchStatus::Unreported => vec![MatchStatus::Pending],
            MatchStatus::Pending => vec![MatchStatus::Verified, MatchStatus::Disputed],
            MatchStatus::Disputed => vec![MatchStatus::Verified, MatchStatus::Invalid],
            MatchStatus::Verified | MatchStatus::Invalid => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Verified | MatchStatus::Invalid)
    }
}

fn status_of(m: &MatchRow) -> Result<MatchStatus, CoreError> {
    MatchStatus::from_str_name(&m.status)
        .ok_or_else(|| CoreError::Internal(format!("match {} has unknown status {}", m.id, m.status)))
}

fn ensure_transition(m: &MatchRow, from: MatchStatus, to: MatchStatus) -> Result<(), CoreError> {
    if from.can_transition_to(&to) {
        Ok(())
    } else {
        Err(CoreError::conflict(format!(
            "match {} cannot move from {} to {}",
            m.id,
            from.as_str(),
            to.as_str()
        )))
    }
}

/// Admin verdict on a disputed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveAction {
    AgreeA,
    AgreeB,
    Invalid,
}

impl ResolveAction {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AGREE_A" => Some(ResolveAction::AgreeA),
            "AGREE_B" => Some(ResolveAction::AgreeB),
            "INVALID" => Some(ResolveAction::Invalid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolveAction::AgreeA => "agree_a",
            ResolveAction::AgreeB => "agree_b",
            ResolveAction::Invalid => "invalid",
        }
    }
}

/// Who is asking to resolve a dispute.
#[derive(Debug, Clone)]
pub struct Actor {
    pub player_id: i64,
    pub platform_admin: bool,
    /// Teams in which the actor is an active owner or admin.
    pub elevated_teams: Vec<i64>,
}

impl Actor {
    /// Read the actor's standing in the match's two teams.
    pub async fn load(
        conn: &mut SqliteConnection,
        player_id: i64,
        platform_admin: bool,
        m: &MatchRow,
    ) -> Result<Self, CoreError> {
        let mut elevated_teams = Vec::new();
        for team_id in [m.team_a_id, m.team_b_id].into_iter().flatten() {
            if let Some(member) = db::fetch_member(conn, team_id, player_id).await? {
                if member.is_elevated() {
                    elevated_teams.push(team_id);
                }
            }
        }
        Ok(Self {
            player_id,
            platform_admin,
            elevated_teams,
        })
    }
}

/// Platform admins may resolve any dispute; otherwise the actor needs an
/// owner or admin role in one of the two teams.
pub fn can_resolve(actor: &Actor, m: &MatchRow) -> bool {
    actor.platform_admin
        || [m.team_a_id, m.team_b_id]
            .into_iter()
            .flatten()
            .any(|t| actor.elevated_teams.contains(&t))
}

/// One side's applied update.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedRating {
    pub team_id: i64,
    #[serde(flatten)]
    pub computation: RatingComputation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReputationChange {
    pub team_id: i64,
    pub before: i32,
    pub after: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub status: MatchStatus,
    pub report_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<AppliedRating>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<AppliedRating>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reputation: Vec<ReputationChange>,
}

fn validate_score(score: i32) -> Result<(), CoreError> {
    if (0..=MAX_REPORTED_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(CoreError::invalid(format!(
            "score must be between 0 and {MAX_REPORTED_SCORE}, got {score}"
        )))
    }
}

fn side_of(m: &MatchRow, team_id: i64) -> Option<Side> {
    if m.team_a_id == Some(team_id) {
        Some(Side::A)
    } else if m.team_b_id == Some(team_id) {
        Some(Side::B)
    } else {
        None
    }
}

fn teams_of(m: &MatchRow) -> Result<(i64, i64), CoreError> {
    match (m.team_a_id, m.team_b_id) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(CoreError::conflict("match has no assigned teams")),
    }
}

/// A team's claimed result. Scores are always in match orientation (side A
/// first), whichever team is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportClaim {
    pub match_id: i64,
    pub team_id: i64,
    pub reporter_id: i64,
    pub score_a: i32,
    pub score_b: i32,
}

/// Record one team's claimed score and compare it with the other team's.
pub async fn submit_report(
    db: &Database,
    cfg: &EngineConfig,
    claim: ReportClaim,
    now: DateTime<Utc>,
) -> Result<SubmitOutcome, CoreError> {
    let ReportClaim {
        match_id,
        team_id,
        reporter_id,
        score_a,
        score_b,
    } = claim;
    validate_score(score_a)?;
    validate_score(score_b)?;

    let mut tx = db.begin_immediate().await?;

    let m = db::fetch_match(&mut tx, match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;
    let status = status_of(&m)?;
    if status.is_terminal() {
        return Err(CoreError::conflict(format!(
            "match is already {}",
            status.as_str()
        )));
    }
    if status == MatchStatus::Disputed {
        return Err(CoreError::conflict("match is disputed and awaits resolution"));
    }
    if now < m.scheduled_at {
        return Err(CoreError::invalid("match has not kicked off yet"));
    }
    if side_of(&m, team_id).is_none() {
        return Err(CoreError::forbidden("team did not take part in this match"));
    }

    let member = db::fetch_member(&mut tx, team_id, reporter_id)
        .await?
        .filter(|member| member.active)
        .ok_or_else(|| CoreError::forbidden("reporter is not an active member of the team"))?;
    let team = db::fetch_team(&mut tx, team_id)
        .await?
        .ok_or(CoreError::NotFound("Team"))?;

    let warning = match reputation::check_can_report(&cfg.reputation, team.reputation) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(match_id, team_id, reputation = team.reputation, "Report blocked by reputation");
            return Err(e);
        }
    };

    let existing = db::fetch_reports(&mut tx, match_id).await?;
    if existing.iter().any(|r| r.team_id == team_id) {
        return Err(CoreError::AlreadyReported);
    }

    let report = MatchReport {
        id: uuid::Uuid::new_v4().to_string(),
        match_id,
        team_id,
        reporter_id,
        reporter_role: member.role.clone(),
        score_a,
        score_b,
        flagged: warning.is_some(),
        created_at: now,
    };
    db::insert_report(&mut tx, &report).await.map_err(|e| {
        if let sqlx::Error::Database(d) = &e {
            if d.is_unique_violation() {
                return CoreError::AlreadyReported;
            }
        }
        CoreError::from(e)
    })?;

    let other = existing.iter().find(|r| r.team_id != team_id);
    let mut outcome = SubmitOutcome {
        status: MatchStatus::Pending,
        report_id: report.id.clone(),
        warning,
        dispute_deadline: None,
        ratings: Vec::new(),
    };

    match other {
        None => {
            if status != MatchStatus::Pending {
                ensure_transition(&m, status, MatchStatus::Pending)?;
                db::set_match_status(&mut tx, match_id, MatchStatus::Pending.as_str(), None).await?;
            }
        }
        Some(other) if other.score_a == score_a && other.score_b == score_b => {
            ensure_transition(&m, status, MatchStatus::Verified)?;
            outcome.ratings = apply_verified_result(&mut tx, cfg, &m, score_a, score_b, now).await?;
            outcome.status = MatchStatus::Verified;
        }
        Some(other) => {
            ensure_transition(&m, status, MatchStatus::Disputed)?;
            let deadline = Duration::try_hours(cfg.dispute.window_hours)
                .and_then(|window| now.checked_add_signed(window))
                .ok_or_else(|| {
                    CoreError::Internal(format!(
                        "dispute window of {} hours is out of range",
                        cfg.dispute.window_hours
                    ))
                })?;
            db::set_match_status(&mut tx, match_id, MatchStatus::Disputed.as_str(), Some(deadline))
                .await?;
            tracing::warn!(
                match_id,
                first = %format!("{}-{}", other.score_a, other.score_b),
                second = %format!("{score_a}-{score_b}"),
                deadline = %deadline,
                "Reports disagree, match disputed"
            );
            outcome.status = MatchStatus::Disputed;
            outcome.dispute_deadline = Some(deadline);
        }
    }

    tx.commit().await?;

    metrics::REPORTS_SUBMITTED_TOTAL.inc();
    if report.flagged {
        metrics::REPORTS_FLAGGED_TOTAL.inc();
    }
    match outcome.status {
        MatchStatus::Verified => record_verified(&outcome.ratings, "agreement"),
        MatchStatus::Disputed => {
            metrics::DISPUTES_OPENED_TOTAL.inc();
            metrics::OPEN_DISPUTES.inc();
        }
        _ => {}
    }
    tracing::info!(
        match_id,
        team_id,
        reporter_id,
        status = outcome.status.as_str(),
        flagged = report.flagged,
        "Match report accepted"
    );
    Ok(outcome)
}

/// Reports currently on file for a match. Visible to members of either team
/// and to platform admins.
pub async fn list_reports(
    db: &Database,
    viewer_id: i64,
    platform_admin: bool,
    match_id: i64,
) -> Result<Vec<MatchReport>, CoreError> {
    let m = db
        .get_match(match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;

    if !platform_admin {
        let mut allowed = false;
        for team_id in [m.team_a_id, m.team_b_id].into_iter().flatten() {
            if let Some(member) = db.get_member(team_id, viewer_id).await? {
                allowed |= member.active;
            }
        }
        if !allowed {
            return Err(CoreError::forbidden("only participating teams may view reports"));
        }
    }

    Ok(db.get_reports(match_id).await?)
}

/// Close a dispute by admin verdict.
pub async fn resolve_dispute(
    db: &Database,
    cfg: &EngineConfig,
    actor_id: i64,
    platform_admin: bool,
    match_id: i64,
    action: ResolveAction,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome, CoreError> {
    let mut tx = db.begin_immediate().await?;

    let m = db::fetch_match(&mut tx, match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;

    let actor = Actor::load(&mut tx, actor_id, platform_admin, &m).await?;
    if !can_resolve(&actor, &m) {
        return Err(CoreError::forbidden(
            "only an owner or admin of a participating team may resolve disputes",
        ));
    }

    let status = status_of(&m)?;
    if status.is_terminal() {
        return Err(CoreError::conflict("dispute already resolved"));
    }
    if status != MatchStatus::Disputed {
        return Err(CoreError::conflict("match is not disputed"));
    }

    let outcome = close_dispute(&mut tx, cfg, &m, action, now).await?;
    tx.commit().await?;

    record_resolution(action, &outcome, "resolution");
    tracing::info!(
        match_id,
        actor_id,
        resolution = action.as_str(),
        "Dispute resolved"
    );
    Ok(outcome)
}

async fn close_dispute(
    conn: &mut SqliteConnection,
    cfg: &EngineConfig,
    m: &MatchRow,
    action: ResolveAction,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome, CoreError> {
    match action {
        ResolveAction::AgreeA | ResolveAction::AgreeB => {
            let (team_a, team_b) = teams_of(m)?;
            let trusted = if action == ResolveAction::AgreeA {
                team_a
            } else {
                team_b
            };
            let reports = db::fetch_reports(conn, m.id).await?;
            let report = reports
                .iter()
                .find(|r| r.team_id == trusted)
                .ok_or_else(|| CoreError::conflict("the chosen team has no report on file"))?;
            let ratings =
                apply_verified_result(conn, cfg, m, report.score_a, report.score_b, now).await?;
            Ok(ResolveOutcome {
                status: MatchStatus::Verified,
                ratings,
                reputation: Vec::new(),
            })
        }
        ResolveAction::Invalid => {
            let reputation = invalidate(conn, cfg, m).await?;
            Ok(ResolveOutcome {
                status: MatchStatus::Invalid,
                ratings: Vec::new(),
                reputation,
            })
        }
    }
}

/// Mark the match INVALID and penalise both teams.
async fn invalidate(
    conn: &mut SqliteConnection,
    cfg: &EngineConfig,
    m: &MatchRow,
) -> Result<Vec<ReputationChange>, CoreError> {
    let mut changes = Vec::new();
    for team_id in [m.team_a_id, m.team_b_id].into_iter().flatten() {
        let team = db::fetch_team(conn, team_id)
            .await?
            .ok_or(CoreError::NotFound("Team"))?;
        let after = reputation::apply_invalid_penalty(&cfg.reputation, team.reputation);
        db::update_reputation(conn, team_id, after).await?;
        db::insert_reputation_event(
            conn,
            team_id,
            Some(m.id),
            after - team.reputation,
            after,
            "dispute_invalid",
        )
        .await?;
        changes.push(ReputationChange {
            team_id,
            before: team.reputation,
            after,
        });
    }
    db::set_match_status(conn, m.id, MatchStatus::Invalid.as_str(), m.dispute_deadline).await?;
    db::delete_reports(conn, m.id).await?;
    Ok(changes)
}

/// Rate both teams from the agreed score and close the match. Runs on the
/// caller's transaction; nothing here commits.
async fn apply_verified_result(
    conn: &mut SqliteConnection,
    cfg: &EngineConfig,
    m: &MatchRow,
    score_a: i32,
    score_b: i32,
    now: DateTime<Utc>,
) -> Result<Vec<AppliedRating>, CoreError> {
    let (team_a_id, team_b_id) = teams_of(m)?;
    let roster = m.parsed_roster()?;

    let team_a = db::fetch_team(conn, team_a_id)
        .await?
        .ok_or(CoreError::NotFound("Team"))?;
    let team_b = db::fetch_team(conn, team_b_id)
        .await?
        .ok_or(CoreError::NotFound("Team"))?;

    let snap_a = snapshot(conn, cfg, &team_a, &roster, Side::A).await?;
    let snap_b = snapshot(conn, cfg, &team_b, &roster, Side::B).await?;
    let (calc_a, calc_b) = rating::rate_match(&cfg.rating, &snap_a, &snap_b, score_a, score_b);

    for (team, opponent_id, side, calc, goals_for, goals_against) in [
        (&team_a, team_b_id, Side::A, &calc_a, score_a, score_b),
        (&team_b, team_a_id, Side::B, &calc_b, score_b, score_a),
    ] {
        db::update_team_rating(
            conn,
            team.id,
            calc.elo_after,
            calc.win_streak_after,
            calc.loss_streak_after,
        )
        .await?;
        db::insert_rating_history(
            conn,
            &history_entry(team.id, m.id, opponent_id, calc, goals_for, goals_against, now),
        )
        .await?;
        db::insert_lineup(conn, m.id, team.id, &roster.lineup(side)).await?;
    }

    db::mark_match_verified(conn, m.id, score_a, score_b, now).await?;
    db::delete_reports(conn, m.id).await?;

    tracing::info!(
        match_id = m.id,
        score = %format!("{score_a}-{score_b}"),
        team_a = team_a_id,
        delta_a = calc_a.delta,
        team_b = team_b_id,
        delta_b = calc_b.delta,
        "Match verified"
    );

    Ok(vec![
        AppliedRating {
            team_id: team_a_id,
            computation: calc_a,
        },
        AppliedRating {
            team_id: team_b_id,
            computation: calc_b,
        },
    ])
}

/// Read everything the calculator needs for one side.
async fn snapshot(
    conn: &mut SqliteConnection,
    cfg: &EngineConfig,
    team: &Team,
    roster: &Roster,
    side: Side,
) -> Result<TeamSnapshot, CoreError> {
    let limit = cfg.rating.recent_scores_per_member as i64;
    let mut member_scores = Vec::new();
    for (player_id, position) in roster.lineup(side) {
        if position == RESERVE_POSITION {
            continue;
        }
        member_scores.push(db::recent_scores(conn, player_id, Some(position), limit).await?);
    }
    // Matches played without anyone on the roster say nothing about stability.
    let mut lineups =
        db::recent_lineups(conn, team.id, cfg.rating.consistency_window as i64).await?;
    lineups.retain(|l| !l.is_empty());

    Ok(TeamSnapshot {
        elo: team.elo,
        match_count: team.match_count,
        win_streak: team.win_streak.max(0) as u32,
        loss_streak: team.loss_streak.max(0) as u32,
        team_rating: rating::team_rating(&cfg.rating, &member_scores),
        consistency: rating::consistency_factor(&cfg.rating, &lineups),
    })
}

fn history_entry(
    team_id: i64,
    match_id: i64,
    opponent_id: i64,
    calc: &RatingComputation,
    score_for: i32,
    score_against: i32,
    now: DateTime<Utc>,
) -> RatingHistoryEntry {
    RatingHistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        team_id,
        match_id,
        opponent_id,
        outcome: calc.outcome.as_str().to_string(),
        score_for,
        score_against,
        elo_before: calc.elo_before,
        elo_after: calc.elo_after,
        delta: calc.delta,
        opponent_elo: calc.opponent_elo,
        team_rating: calc.team_rating,
        opponent_team_rating: calc.opponent_team_rating,
        influence_factor: calc.influence_factor,
        adjusted_elo: calc.adjusted_elo,
        opponent_adjusted_elo: calc.opponent_adjusted_elo,
        expected: calc.expected,
        consistency: calc.consistency,
        streak_factor: calc.streak_factor,
        k_factor: calc.k_factor,
        created_at: now,
    }
}

fn record_verified(ratings: &[AppliedRating], path: &str) {
    metrics::MATCHES_VERIFIED_TOTAL.with_label_values(&[path]).inc();
    for r in ratings {
        metrics::RATING_DELTA.observe(r.computation.delta as f64);
    }
}

fn record_resolution(action: ResolveAction, outcome: &ResolveOutcome, path: &str) {
    metrics::DISPUTES_RESOLVED_TOTAL
        .with_label_values(&[action.as_str()])
        .inc();
    metrics::OPEN_DISPUTES.dec();
    if outcome.status == MatchStatus::Verified {
        record_verified(&outcome.ratings, path);
    }
}

// ── Deadline sweep ────────────────────────────────────────────────────

/// Apply the configured expiry policy to one match if its deadline passed.
/// Returns `None` when there was nothing to do.
pub async fn expire_dispute(
    db: &Database,
    cfg: &EngineConfig,
    match_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<ResolveOutcome>, CoreError> {
    if cfg.dispute.expiry_policy == DisputeExpiryPolicy::Manual {
        return Ok(None);
    }

    let mut tx = db.begin_immediate().await?;
    let Some(m) = db::fetch_match(&mut tx, match_id).await? else {
        return Ok(None);
    };
    if status_of(&m)? != MatchStatus::Disputed || m.dispute_deadline.map_or(true, |d| d > now) {
        return Ok(None);
    }

    let action = match cfg.dispute.expiry_policy {
        DisputeExpiryPolicy::Invalidate => ResolveAction::Invalid,
        DisputeExpiryPolicy::AcceptFirstReport => {
            let (team_a, _) = teams_of(&m)?;
            let reports = db::fetch_reports(&mut tx, m.id).await?;
            match reports.first() {
                Some(first) if first.team_id == team_a => ResolveAction::AgreeA,
                Some(_) => ResolveAction::AgreeB,
                None => ResolveAction::Invalid,
            }
        }
        DisputeExpiryPolicy::Manual => return Ok(None),
    };

    let outcome = close_dispute(&mut tx, cfg, &m, action, now).await?;
    tx.commit().await?;

    record_resolution(action, &outcome, "expiry");
    tracing::info!(
        match_id,
        resolution = action.as_str(),
        "Dispute expired and was closed automatically"
    );
    Ok(Some(outcome))
}

/// Close every dispute whose deadline has passed. Returns how many closed.
pub async fn sweep_expired_disputes(
    db: &Database,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let mut closed = 0;
    for m in db.list_disputed_matches().await? {
        if m.dispute_deadline.map_or(true, |d| d > now) {
            continue;
        }
        match expire_dispute(db, cfg, m.id, now).await {
            Ok(Some(_)) => closed += 1,
            Ok(None) => {}
            Err(e) => tracing::error!(match_id = m.id, error = %e, "Failed to expire dispute"),
        }
    }
    Ok(closed)
}

/// Background task that applies the expiry policy periodically. Does nothing
/// under the manual policy.
pub fn spawn_dispute_sweeper(db: Arc<Database>, cfg: Arc<EngineConfig>) {
    if cfg.dispute.expiry_policy == DisputeExpiryPolicy::Manual {
        tracing::info!("Dispute expiry policy is manual, sweeper not started");
        return;
    }
    let interval_secs = cfg.dispute.sweep_interval_secs.max(1);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
            match sweep_expired_disputes(&db, &cfg, Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(closed = n, "Dispute sweep finished"),
                Err(e) => tracing::error!("Dispute sweep failed: {e}"),
            }
        }
    });
}
