// Authentication: bearer JWTs issued by the identity provider, and the axum
// extractors that turn them into a player id and platform role.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Fallback secret for local development.
pub const DEV_JWT_SECRET: &str = "pitchside-dev-secret-change-in-production";

/// Verification secret, injected into request extensions by the router.
#[derive(Debug, Clone)]
pub struct JwtSecret(pub String);

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64, // player id
    pub username: String,
    pub role: String,
    pub exp: usize, // expiry (unix timestamp)
}

impl Claims {
    pub fn is_platform_admin(&self) -> bool {
        self.role == "admin"
    }
}

pub fn create_token(secret: &str, player_id: i64, username: &str, role: &str) -> Result<String, String> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: player_id,
        username: username.to_string(),
        role: role.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

fn secret_for(parts: &Parts) -> String {
    match parts.extensions.get::<JwtSecret>() {
        Some(s) => s.0.clone(),
        None => std::env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string()),
    }
}

fn unauthorized(msg: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": msg })),
    )
}

// ── Axum extractor: AuthUser ─────────────────────────────────────────

/// Extracts the authenticated player from the Authorization header.
/// Usage: `AuthUser(claims)` in handler parameters.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("Invalid Authorization header format"))?;

        verify_token(&secret_for(parts), token)
            .map(AuthUser)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {e}");
                unauthorized("Invalid token")
            })
    }
}
