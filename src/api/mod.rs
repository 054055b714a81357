// HTTP API routes (rosters, match reports, disputes, ratings, reputation).

use axum::{
    extract::{Json, Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::allocator;
use crate::auth::{AuthUser, JwtSecret};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::CoreError;
use crate::metrics;
use crate::rating;
use crate::reputation;
use crate::roster::{MatchFormat, Roster, Side, MAX_RESERVES};
use crate::verification::{self, ReportClaim, ResolveAction};

const DEFAULT_RESERVES: usize = 2;
const MAX_TEAM_NAME: usize = 64;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateMatchRequest {
    pub format: String,
    pub scheduled_at: DateTime<Utc>,
    pub reserves: Option<usize>,
    pub team_a_id: Option<i64>,
    pub team_b_id: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct JoinRequest {
    pub position: Option<String>,
    pub team: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitReportRequest {
    pub team_id: i64,
    pub score_a: i32,
    pub score_b: i32,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub action: String,
}

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationParams {
    fn resolve(&self, default_limit: i64) -> (i64, i64) {
        (
            self.limit.unwrap_or(default_limit).clamp(1, 100),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<EngineConfig>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    CoreError::from(e)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(db: Arc<Database>, engine: Arc<EngineConfig>, jwt_secret: String) -> Router {
    let state = AppState { db, engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Teams
        .route("/api/teams", post(create_team))
        .route("/api/teams/{id}/rating", get(get_team_rating))
        .route("/api/teams/{id}/rating/history", get(get_team_rating_history))
        .route("/api/teams/{id}/rank", get(get_team_rank))
        .route("/api/teams/{id}/reputation", get(get_team_reputation))
        .route("/api/leaderboard", get(get_leaderboard))
        // Matches and rosters
        .route("/api/matches", post(create_match))
        .route("/api/matches/{id}/roster", get(get_roster))
        .route("/api/matches/{id}/join", post(join_match))
        .route("/api/matches/{id}/leave", post(leave_match))
        // Reports and disputes
        .route(
            "/api/matches/{id}/reports",
            get(list_reports).post(submit_report),
        )
        .route("/api/matches/{id}/resolve", post(resolve_dispute))
        .with_state(state)
        .layer(Extension(JwtSecret(jwt_secret)))
        .layer(axum::middleware::from_fn(track_requests))
}

async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(start.elapsed().as_secs_f64());
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    response
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "pitchside-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Team handlers ─────────────────────────────────────────────────────

async fn create_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateTeamRequest>,
) -> impl IntoResponse {
    let name = req.name.trim();
    if name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    if name.chars().count() > MAX_TEAM_NAME {
        return json_error(StatusCode::BAD_REQUEST, "name is too long").into_response();
    }
    match state
        .db
        .create_team(
            name,
            auth.0.sub,
            state.engine.rating.starting_elo,
            state.engine.reputation.ceiling,
        )
        .await
    {
        Ok(team) => {
            tracing::info!(team_id = team.id, owner = auth.0.sub, "Team created");
            (StatusCode::CREATED, Json(json!(team))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_team_rating(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let team = match state.db.get_team(id).await {
        Ok(Some(t)) => t,
        Ok(None) => return CoreError::NotFound("Team").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };
    let counts = match state.db.outcome_counts(id).await {
        Ok(c) => c,
        Err(e) => return internal_error(e).into_response(),
    };
    let last_delta = match state.db.rating_history(id, 1, 0).await {
        Ok(h) => h.first().map(|entry| entry.delta),
        Err(e) => return internal_error(e).into_response(),
    };
    let (rank, total_teams) = match state.db.team_rank(id).await {
        Ok(Some(r)) => r,
        Ok(None) => return CoreError::NotFound("Team").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };

    (
        StatusCode::OK,
        Json(json!({
            "team_id": team.id,
            "name": team.name,
            "elo": team.elo,
            "match_count": team.match_count,
            "win_streak": team.win_streak,
            "loss_streak": team.loss_streak,
            "provisional": rating::is_provisional(&state.engine.rating, team.match_count),
            "wins": counts.wins,
            "draws": counts.draws,
            "losses": counts.losses,
            "last_delta": last_delta,
            "rank": rank,
            "total_teams": total_teams,
        })),
    )
        .into_response()
}

async fn get_team_rating_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    match state.db.get_team(id).await {
        Ok(None) => return CoreError::NotFound("Team").into_response(),
        Err(e) => return internal_error(e).into_response(),
        Ok(Some(_)) => {}
    }
    let (limit, offset) = params.resolve(20);
    match state.db.rating_history(id, limit, offset).await {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_team_rank(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.db.team_rank(id).await {
        Ok(Some((rank, total))) => (
            StatusCode::OK,
            Json(json!({ "team_id": id, "rank": rank, "total_teams": total })),
        )
            .into_response(),
        Ok(None) => CoreError::NotFound("Team").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let (limit, offset) = params.resolve(50);
    match state.db.leaderboard(limit, offset).await {
        Ok(entries) => {
            let rows: Vec<Value> = entries
                .iter()
                .map(|e| {
                    json!({
                        "rank": e.rank,
                        "team_id": e.team_id,
                        "name": e.name,
                        "elo": e.elo,
                        "match_count": e.match_count,
                        "provisional": rating::is_provisional(&state.engine.rating, e.match_count),
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!(rows))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_team_reputation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let team = match state.db.get_team(id).await {
        Ok(Some(t)) => t,
        Ok(None) => return CoreError::NotFound("Team").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };

    let role = if auth.0.is_platform_admin() {
        Some("admin".to_string())
    } else {
        match state.db.get_member(id, auth.0.sub).await {
            Ok(Some(m)) if m.active => Some(m.role),
            Ok(_) => None,
            Err(e) => return internal_error(e).into_response(),
        }
    };

    let view = reputation::view(&state.engine.reputation, team.id, team.reputation, role.as_deref());
    (StatusCode::OK, Json(json!(view))).into_response()
}

// ── Match and roster handlers ────────────────────────────────────────

async fn create_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateMatchRequest>,
) -> impl IntoResponse {
    let Some(format) = MatchFormat::from_str_name(&req.format) else {
        return json_error(StatusCode::BAD_REQUEST, "format must be one of 5v5, 7v7, 11v11")
            .into_response();
    };
    let reserves = req.reserves.unwrap_or(DEFAULT_RESERVES);
    if reserves > MAX_RESERVES {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("at most {MAX_RESERVES} reserves per team"),
        )
        .into_response();
    }
    if req.team_a_id.is_some() && req.team_a_id == req.team_b_id {
        return json_error(StatusCode::BAD_REQUEST, "a team cannot play itself").into_response();
    }
    for team_id in [req.team_a_id, req.team_b_id].into_iter().flatten() {
        match state.db.get_team(team_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return CoreError::NotFound("Team").into_response(),
            Err(e) => return internal_error(e).into_response(),
        }
    }

    let roster = Roster::from_template(format, reserves);
    match state
        .db
        .create_match(format, req.team_a_id, req.team_b_id, req.scheduled_at, &roster)
        .await
    {
        Ok(m) => {
            tracing::info!(match_id = m.id, format = format.as_str(), creator = auth.0.sub, "Match created");
            (
                StatusCode::CREATED,
                Json(json!({ "match": m, "roster": roster })),
            )
                .into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_roster(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match allocator::get_roster(&state.db, id).await {
        Ok(roster) => (StatusCode::OK, Json(json!(roster))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn join_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<JoinRequest>,
) -> impl IntoResponse {
    let desired_team = match req.team.as_deref() {
        None => None,
        Some(raw) => match Side::from_str_name(raw) {
            Some(side) => Some(side),
            None => {
                return json_error(StatusCode::BAD_REQUEST, "team must be A or B").into_response()
            }
        },
    };
    match allocator::join(&state.db, id, auth.0.sub, req.position.as_deref(), desired_team).await {
        Ok(result) => (StatusCode::OK, Json(json!(result))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn leave_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match allocator::leave(&state.db, id, auth.0.sub).await {
        Ok(result) => (StatusCode::OK, Json(json!(result))).into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Report and dispute handlers ──────────────────────────────────────

async fn submit_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SubmitReportRequest>,
) -> impl IntoResponse {
    let claim = ReportClaim {
        match_id: id,
        team_id: req.team_id,
        reporter_id: auth.0.sub,
        score_a: req.score_a,
        score_b: req.score_b,
    };
    match verification::submit_report(&state.db, &state.engine, claim, Utc::now()).await {
        Ok(outcome) => (StatusCode::CREATED, Json(json!(outcome))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match verification::list_reports(&state.db, auth.0.sub, auth.0.is_platform_admin(), id).await {
        Ok(reports) => (StatusCode::OK, Json(json!(reports))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn resolve_dispute(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let Some(action) = ResolveAction::from_str_name(&req.action) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "action must be AGREE_A, AGREE_B or INVALID",
        )
        .into_response();
    };
    match verification::resolve_dispute(
        &state.db,
        &state.engine,
        auth.0.sub,
        auth.0.is_platform_admin(),
        id,
        action,
        Utc::now(),
    )
    .await
    {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))).into_response(),
        Err(e) => e.into_response(),
    }
}
