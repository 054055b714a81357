// Slot allocator: turns join/leave requests into roster mutations.
//
// Each mutation runs in its own write transaction that re-reads the stored
// roster, re-validates the target slot, and writes back conditionally on the
// roster revision. A request that loses a race sees the slot as taken and
// fails; retrying is up to the caller.

use serde::Serialize;

use crate::db::{self, Database, MatchRow};
use crate::error::CoreError;
use crate::metrics;
use crate::roster::{Placement, Roster, Side};
use crate::verification::MatchStatus;

#[derive(Debug, Clone, Serialize)]
pub struct JoinResult {
    #[serde(flatten)]
    pub placement: Placement,
    /// The player already held this slot; nothing was written.
    pub already_seated: bool,
}

/// Place a player into the match roster.
pub async fn join(
    db: &Database,
    match_id: i64,
    player_id: i64,
    desired_position: Option<&str>,
    desired_team: Option<Side>,
) -> Result<JoinResult, CoreError> {
    let result = try_join(db, match_id, player_id, desired_position, desired_team).await;
    let label = match &result {
        Ok(r) if r.already_seated => "idempotent",
        Ok(_) => "placed",
        Err(e) => e.code(),
    };
    metrics::SLOT_JOINS_TOTAL.with_label_values(&[label]).inc();
    result
}

async fn try_join(
    db: &Database,
    match_id: i64,
    player_id: i64,
    desired_position: Option<&str>,
    desired_team: Option<Side>,
) -> Result<JoinResult, CoreError> {
    let mut tx = db.begin_immediate().await?;

    let m = db::fetch_match(&mut tx, match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;
    let mut roster = m.parsed_roster()?;

    if let Some(idx) = roster.slot_of(player_id) {
        tx.rollback().await?;
        return Ok(JoinResult {
            placement: Placement::from(&roster.slots[idx]),
            already_seated: true,
        });
    }

    ensure_roster_open(&m)?;

    let preferences = if desired_position.is_none() {
        db::position_preferences(&mut tx, player_id).await?
    } else {
        Vec::new()
    };

    let idx = match roster.select_slot(desired_position, desired_team, &preferences) {
        Ok(idx) => idx,
        Err(e) => {
            tracing::info!(match_id, player_id, error = %e, "Join refused");
            return Err(e);
        }
    };
    roster.place(idx, player_id)?;

    if !db::write_roster(&mut tx, match_id, &roster, m.roster_rev).await? {
        tracing::warn!(match_id, player_id, "Roster changed underneath join");
        return Err(CoreError::SlotTaken);
    }
    tx.commit().await?;

    let placement = Placement::from(&roster.slots[idx]);
    tracing::info!(
        match_id,
        player_id,
        position = %placement.position,
        team = placement.team.as_str(),
        "Player joined match"
    );
    Ok(JoinResult {
        placement,
        already_seated: false,
    })
}

/// Outcome of a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaveResult {
    /// Slots that were vacated.
    pub cleared: usize,
    /// The match is closed; its lineup stays as it was verified.
    pub roster_locked: bool,
}

/// Remove a player from every slot they hold. Always succeeds for an existing
/// match: absent players and closed matches are a no-op.
pub async fn leave(db: &Database, match_id: i64, player_id: i64) -> Result<LeaveResult, CoreError> {
    let mut tx = db.begin_immediate().await?;

    let m = db::fetch_match(&mut tx, match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;
    let mut roster = m.parsed_roster()?;

    if roster.slot_of(player_id).is_none() {
        tx.rollback().await?;
        return Ok(LeaveResult {
            cleared: 0,
            roster_locked: roster_closed(&m)?,
        });
    }

    if roster_closed(&m)? {
        tx.rollback().await?;
        tracing::info!(match_id, player_id, status = %m.status, "Leave ignored on closed match");
        return Ok(LeaveResult {
            cleared: 0,
            roster_locked: true,
        });
    }

    let cleared = roster.vacate(player_id);
    if cleared > 1 {
        tracing::warn!(match_id, player_id, cleared, "Player held more than one slot");
    }

    // BEGIN IMMEDIATE holds the write lock, so the revision cannot move here.
    if !db::write_roster(&mut tx, match_id, &roster, m.roster_rev).await? {
        return Err(CoreError::Internal(format!(
            "roster revision of match {match_id} moved inside a write transaction"
        )));
    }
    tx.commit().await?;

    metrics::SLOT_LEAVES_TOTAL.inc();
    tracing::info!(match_id, player_id, "Player left match");
    Ok(LeaveResult {
        cleared,
        roster_locked: false,
    })
}

pub async fn get_roster(db: &Database, match_id: i64) -> Result<Roster, CoreError> {
    let m = db
        .get_match(match_id)
        .await?
        .ok_or(CoreError::NotFound("Match"))?;
    m.parsed_roster()
}

/// The lineup is frozen once the match is VERIFIED or INVALID.
fn roster_closed(m: &MatchRow) -> Result<bool, CoreError> {
    MatchStatus::from_str_name(&m.status)
        .map(|status| status.is_terminal())
        .ok_or_else(|| CoreError::Internal(format!("match {} has unknown status {}", m.id, m.status)))
}

fn ensure_roster_open(m: &MatchRow) -> Result<(), CoreError> {
    if roster_closed(m)? {
        return Err(CoreError::conflict(format!(
            "roster is locked, the match is {}",
            m.status
        )));
    }
    Ok(())
}
