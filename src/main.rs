use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use pitchside_backend::config::Config;
use pitchside_backend::{api, db, metrics, verification};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pitchside_backend=info,tower_http=info")),
        )
        .init();

    let config = Config::load();
    metrics::register_metrics();

    let db = db::Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    match db.list_disputed_matches().await {
        Ok(open) => metrics::OPEN_DISPUTES.set(open.len() as i64),
        Err(e) => tracing::warn!("Could not count open disputes: {e}"),
    }

    let engine = Arc::new(config.engine.clone());
    verification::spawn_dispute_sweeper(db.clone(), engine.clone());

    let app = api::router(db, engine, config.jwt_secret.clone()).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(
        port = config.port,
        dispute_policy = ?config.engine.dispute.expiry_policy,
        "Pitchside backend listening"
    );
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
