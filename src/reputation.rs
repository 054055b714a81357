// Reputation gate: a bounded trust score per team, lowered by invalidated
// disputes, that restricts who may keep reporting results.

use serde::{Deserialize, Serialize};

use crate::config::ReputationConfig;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationStanding {
    Good,
    Warning,
    Blocked,
}

pub fn standing(cfg: &ReputationConfig, score: i32) -> ReputationStanding {
    if score <= cfg.block_threshold {
        ReputationStanding::Blocked
    } else if score <= cfg.warning_threshold {
        ReputationStanding::Warning
    } else {
        ReputationStanding::Good
    }
}

pub fn clamp(cfg: &ReputationConfig, score: i32) -> i32 {
    score.clamp(cfg.floor, cfg.ceiling)
}

/// Score after an INVALID resolution.
pub fn apply_invalid_penalty(cfg: &ReputationConfig, score: i32) -> i32 {
    clamp(cfg, score.saturating_sub(cfg.invalid_penalty))
}

/// Gate a new match report. `Ok(Some(..))` lets the report through with a
/// warning attached.
pub fn check_can_report(cfg: &ReputationConfig, score: i32) -> Result<Option<String>, CoreError> {
    match standing(cfg, score) {
        ReputationStanding::Blocked => Err(CoreError::forbidden(
            "team reputation is too low to report match results",
        )),
        ReputationStanding::Warning => Ok(Some(format!(
            "team reputation is low ({score}); further invalid reports will block reporting"
        ))),
        ReputationStanding::Good => Ok(None),
    }
}

/// What a caller gets back when asking for a team's reputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "visibility", rename_all = "snake_case")]
pub enum ReputationView {
    Visible {
        team_id: i64,
        score: i32,
        standing: ReputationStanding,
        ceiling: i32,
        floor: i32,
    },
    Hidden { message: String },
}

impl ReputationView {
    pub fn hidden() -> Self {
        ReputationView::Hidden {
            message: "Reputation is not visible".to_string(),
        }
    }
}

/// Reputation is only shown to a team's owners and admins.
pub fn view(cfg: &ReputationConfig, team_id: i64, score: i32, viewer_role: Option<&str>) -> ReputationView {
    match viewer_role {
        Some("owner") | Some("admin") => ReputationView::Visible {
            team_id,
            score,
            standing: standing(cfg, score),
            ceiling: cfg.ceiling,
            floor: cfg.floor,
        },
        _ => ReputationView::hidden(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standing_thresholds() {
        let cfg = ReputationConfig::default();
        assert_eq!(standing(&cfg, 100), ReputationStanding::Good);
        assert_eq!(standing(&cfg, 61), ReputationStanding::Good);
        assert_eq!(standing(&cfg, 60), ReputationStanding::Warning);
        assert_eq!(standing(&cfg, 31), ReputationStanding::Warning);
        assert_eq!(standing(&cfg, 30), ReputationStanding::Blocked);
        assert_eq!(standing(&cfg, 0), ReputationStanding::Blocked);
    }

    #[test]
    fn test_penalty_never_passes_floor() {
        let cfg = ReputationConfig::default();
        let mut score = cfg.ceiling;
        for _ in 0..50 {
            score = apply_invalid_penalty(&cfg, score);
            assert!(score >= cfg.floor);
        }
        assert_eq!(score, cfg.floor);
        assert_eq!(apply_invalid_penalty(&cfg, i32::MIN), cfg.floor);
    }

    #[test]
    fn test_report_gate() {
        let cfg = ReputationConfig::default();
        assert_eq!(check_can_report(&cfg, 100).unwrap(), None);
        assert!(check_can_report(&cfg, 55).unwrap().is_some());
        assert!(matches!(
            check_can_report(&cfg, 30),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[test]
    fn test_visibility() {
        let cfg = ReputationConfig::default();
        assert!(matches!(
            view(&cfg, 1, 80, Some("owner")),
            ReputationView::Visible { score: 80, .. }
        ));
        assert!(matches!(view(&cfg, 1, 80, Some("admin")), ReputationView::Visible { .. }));
        assert_eq!(view(&cfg, 1, 80, Some("member")), ReputationView::hidden());
        assert_eq!(view(&cfg, 1, 80, None), ReputationView::hidden());
    }

    #[test]
    fn test_view_serialization() {
        let json = serde_json::to_value(ReputationView::hidden()).unwrap();
        assert_eq!(json["visibility"], "hidden");
        let cfg = ReputationConfig::default();
        let json = serde_json::to_value(view(&cfg, 3, 45, Some("owner"))).unwrap();
        assert_eq!(json["visibility"], "visible");
        assert_eq!(json["standing"], "warning");
    }
}
