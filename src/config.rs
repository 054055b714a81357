// Application configuration, loaded from environment variables and CLI flags,
// plus the immutable tunings handed to the rating engine and reputation gate.

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Secret used to verify bearer tokens issued by the identity provider.
    pub jwt_secret: String,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:pitchside.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `JWT_SECRET` - token verification secret
    /// - `DISPUTE_WINDOW_HOURS` - hours before a dispute passes its deadline (default: 48)
    /// - `DISPUTE_EXPIRY_POLICY` - `manual`, `invalidate` or `accept_first_report`
    /// - `DISPUTE_SWEEP_SECONDS` - sweep interval when the policy is not `manual`
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:pitchside.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| crate::auth::DEV_JWT_SECRET.to_string());

        let mut dispute = DisputeConfig::default();
        if let Some(hours) = std::env::var("DISPUTE_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            dispute.window_hours = DisputeConfig::clamp_window_hours(hours);
            if dispute.window_hours != hours {
                tracing::warn!(
                    requested = hours,
                    using = dispute.window_hours,
                    "DISPUTE_WINDOW_HOURS out of range"
                );
            }
        }
        if let Ok(policy) = std::env::var("DISPUTE_EXPIRY_POLICY") {
            match DisputeExpiryPolicy::from_str_name(&policy) {
                Some(p) => dispute.expiry_policy = p,
                None => tracing::warn!(policy = %policy, "Unknown dispute expiry policy, keeping manual"),
            }
        }
        if let Some(secs) = std::env::var("DISPUTE_SWEEP_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            dispute.sweep_interval_secs = secs;
        }

        Config {
            database_url,
            port,
            jwt_secret,
            engine: EngineConfig {
                dispute,
                ..EngineConfig::default()
            },
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

/// Every tuning the engine reads. Built once and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rating: RatingConfig,
    pub reputation: ReputationConfig,
    pub dispute: DisputeConfig,
}

/// Rating calculator constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingConfig {
    pub starting_elo: i32,
    pub rating_floor: i32,
    pub k_provisional: f64,
    pub k_established: f64,
    /// Teams with fewer verified matches than this use `k_provisional`.
    pub provisional_matches: i32,
    pub score_min: f64,
    pub score_max: f64,
    /// Most recent performance scores considered per member.
    pub recent_scores_per_member: usize,
    /// Below this many active members TR falls back to the score midpoint.
    pub min_active_members: usize,
    pub consistency_window: usize,
    /// TCF is 1.0 when a team has fewer verified matches than this.
    pub consistency_min_matches: usize,
    /// Appearances within the window that make a player part of the core.
    pub core_appearances: usize,
    pub core_size: usize,
    pub streak_cap: u32,
    pub streak_step: f64,
    pub loss_shield_start: u32,
    pub loss_shield_decay: f64,
    pub loss_shield_floor: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            starting_elo: 1000,
            rating_floor: 100,
            k_provisional: 60.0,
            k_established: 40.0,
            provisional_matches: 5,
            score_min: 0.0,
            score_max: 10.0,
            recent_scores_per_member: 5,
            min_active_members: 3,
            consistency_window: 5,
            consistency_min_matches: 3,
            core_appearances: 3,
            core_size: 5,
            streak_cap: 5,
            streak_step: 0.05,
            loss_shield_start: 5,
            loss_shield_decay: 0.1,
            loss_shield_floor: 0.5,
        }
    }
}

impl RatingConfig {
    pub fn score_midpoint(&self) -> f64 {
        (self.score_min + self.score_max) / 2.0
    }
}

/// Reputation gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationConfig {
    pub ceiling: i32,
    pub floor: i32,
    /// At or below this, reports are accepted but flagged.
    pub warning_threshold: i32,
    /// At or below this, reports are refused.
    pub block_threshold: i32,
    pub invalid_penalty: i32,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            ceiling: 100,
            floor: 0,
            warning_threshold: 60,
            block_threshold: 30,
            invalid_penalty: 15,
        }
    }
}

/// What happens to a dispute nobody resolved before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeExpiryPolicy {
    /// Deadline is informational only; the match stays disputed.
    Manual,
    /// Expired disputes resolve as INVALID with the usual penalty.
    Invalidate,
    /// Expired disputes resolve in favour of whichever report arrived first.
    AcceptFirstReport,
}

impl DisputeExpiryPolicy {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "invalidate" => Some(Self::Invalidate),
            "accept_first_report" => Some(Self::AcceptFirstReport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeConfig {
    pub window_hours: i64,
    pub expiry_policy: DisputeExpiryPolicy,
    pub sweep_interval_secs: u64,
}

impl DisputeConfig {
    pub const MIN_WINDOW_HOURS: i64 = 1;
    /// One year.
    pub const MAX_WINDOW_HOURS: i64 = 24 * 366;

    pub fn clamp_window_hours(hours: i64) -> i64 {
        hours.clamp(Self::MIN_WINDOW_HOURS, Self::MAX_WINDOW_HOURS)
    }
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            window_hours: 48,
            expiry_policy: DisputeExpiryPolicy::Manual,
            sweep_interval_secs: 300,
        }
    }
}
