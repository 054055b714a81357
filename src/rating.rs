// Team rating calculation.
//
// Elo-style update with opponent-relative strength, roster consistency and
// streak multipliers. Everything here is pure: callers read the inputs first
// and persist the results themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RatingConfig;

/// Match outcome from the perspective of one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    pub fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Loss => 0.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }

    pub fn from_scores(goals_for: i32, goals_against: i32) -> Self {
        match goals_for.cmp(&goals_against) {
            std::cmp::Ordering::Greater => Outcome::Win,
            std::cmp::Ordering::Less => Outcome::Loss,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Draw => "draw",
            Outcome::Loss => "loss",
        }
    }
}

/// Team Rating: mean over active members of each member's recent score mean.
///
/// `members` holds one list per active member, most recent score first.
/// Members without scores count as the midpoint of the scoring range, and an
/// under-staffed side is rated at the midpoint outright.
pub fn team_rating(cfg: &RatingConfig, members: &[Vec<f64>]) -> f64 {
    let midpoint = cfg.score_midpoint();
    if members.len() < cfg.min_active_members || members.is_empty() {
        return midpoint;
    }
    let total: f64 = members
        .iter()
        .map(|scores| {
            let recent: Vec<f64> = scores
                .iter()
                .take(cfg.recent_scores_per_member)
                .map(|s| s.clamp(cfg.score_min, cfg.score_max))
                .collect();
            if recent.is_empty() {
                midpoint
            } else {
                recent.iter().sum::<f64>() / recent.len() as f64
            }
        })
        .sum();
    total / members.len() as f64
}

/// Rating Influence Factor: own TR relative to the opponent's.
pub fn influence_factor(own_tr: f64, opponent_tr: f64) -> f64 {
    if opponent_tr <= 0.0 {
        1.0
    } else {
        own_tr / opponent_tr
    }
}

pub fn adjusted_elo(elo: i32, rif: f64) -> f64 {
    elo as f64 * rif
}

/// Logistic win expectation on the adjusted ratings.
pub fn expected_score(own_ae: f64, opponent_ae: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((opponent_ae - own_ae) / 400.0))
}

/// Team Consistency Factor from the lineups of recent verified matches.
///
/// `recent_lineups` is ordered most recent first; only the configured window
/// is read. Players who appeared in enough of those matches form the core,
/// and the factor is the core size over the nominal core, capped at 1.0.
pub fn consistency_factor(cfg: &RatingConfig, recent_lineups: &[Vec<i64>]) -> f64 {
    let window: Vec<&Vec<i64>> = recent_lineups.iter().take(cfg.consistency_window).collect();
    if window.len() < cfg.consistency_min_matches || cfg.core_size == 0 {
        return 1.0;
    }
    let mut appearances: HashMap<i64, usize> = HashMap::new();
    for lineup in window {
        let mut unique = lineup.clone();
        unique.sort_unstable();
        unique.dedup();
        for player in unique {
            *appearances.entry(player).or_default() += 1;
        }
    }
    let core = appearances
        .values()
        .filter(|&&n| n >= cfg.core_appearances)
        .count();
    (core as f64 / cfg.core_size as f64).min(1.0)
}

/// Dampening applied once a losing run passes the shield start.
pub fn loss_shield(cfg: &RatingConfig, loss_streak: u32) -> f64 {
    if loss_streak <= cfg.loss_shield_start {
        return 1.0;
    }
    let beyond = (loss_streak - cfg.loss_shield_start) as f64;
    (1.0 - cfg.loss_shield_decay * beyond).max(cfg.loss_shield_floor)
}

pub fn streak_factor(cfg: &RatingConfig, win_streak: u32, loss_streak: u32) -> f64 {
    if win_streak > 0 {
        1.0 + cfg.streak_step * win_streak.min(cfg.streak_cap) as f64
    } else if loss_streak > 0 {
        (1.0 + cfg.streak_step * loss_streak.min(cfg.streak_cap) as f64)
            * loss_shield(cfg, loss_streak)
    } else {
        1.0
    }
}

/// K-factor: teams still provisional move faster.
pub fn k_factor(cfg: &RatingConfig, match_count: i32) -> f64 {
    if match_count < cfg.provisional_matches {
        cfg.k_provisional
    } else {
        cfg.k_established
    }
}

pub fn is_provisional(cfg: &RatingConfig, match_count: i32) -> bool {
    match_count < cfg.provisional_matches
}

pub fn rating_delta(k: f64, outcome: Outcome, expected: f64, tcf: f64, streak: f64) -> i32 {
    (k * (outcome.score() - expected) * tcf * streak).round() as i32
}

/// Apply a delta without ever dropping below the floor.
pub fn apply_delta(cfg: &RatingConfig, elo: i32, delta: i32) -> i32 {
    (elo + delta).max(cfg.rating_floor)
}

/// Everything the calculator needs to know about one side, read beforehand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub elo: i32,
    pub match_count: i32,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub team_rating: f64,
    pub consistency: f64,
}

/// Every intermediate quantity of one side's update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingComputation {
    pub outcome: Outcome,
    pub elo_before: i32,
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
    pub delta: i32,
    pub elo_after: i32,
    pub win_streak_after: u32,
    pub loss_streak_after: u32,
}

/// Compute one side's update against an opponent snapshot.
pub fn compute(
    cfg: &RatingConfig,
    team: &TeamSnapshot,
    opponent: &TeamSnapshot,
    outcome: Outcome,
) -> RatingComputation {
    let rif = influence_factor(team.team_rating, opponent.team_rating);
    let opponent_rif = influence_factor(opponent.team_rating, team.team_rating);
    let ae = adjusted_elo(team.elo, rif);
    let opponent_ae = adjusted_elo(opponent.elo, opponent_rif);
    let expected = expected_score(ae, opponent_ae);
    let streak = streak_factor(cfg, team.win_streak, team.loss_streak);
    let k = k_factor(cfg, team.match_count);
    let delta = rating_delta(k, outcome, expected, team.consistency, streak);

    let (win_streak_after, loss_streak_after) = match outcome {
        Outcome::Win => (team.win_streak + 1, 0),
        Outcome::Loss => (0, team.loss_streak + 1),
        Outcome::Draw => (0, 0),
    };

    RatingComputation {
        outcome,
        elo_before: team.elo,
        opponent_elo: opponent.elo,
        team_rating: team.team_rating,
        opponent_team_rating: opponent.team_rating,
        influence_factor: rif,
        adjusted_elo: ae,
        opponent_adjusted_elo: opponent_ae,
        expected,
        consistency: team.consistency,
        streak_factor: streak,
        k_factor: k,
        delta,
        elo_after: apply_delta(cfg, team.elo, delta),
        win_streak_after,
        loss_streak_after,
    }
}

/// Rate both sides of a result. Each side is computed from the other's
/// pre-match snapshot, so the order of the two updates does not matter.
pub fn rate_match(
    cfg: &RatingConfig,
    team_a: &TeamSnapshot,
    team_b: &TeamSnapshot,
    score_a: i32,
    score_b: i32,
) -> (RatingComputation, RatingComputation) {
    let outcome_a = Outcome::from_scores(score_a, score_b);
    (
        compute(cfg, team_a, team_b, outcome_a),
        compute(cfg, team_b, team_a, outcome_a.opposite()),
    )
}
