// Error taxonomy shared by every engine operation.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Coarse classification callers and the HTTP layer branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Invalid,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("slot is already taken")]
    SlotTaken,

    #[error("none of the preferred positions has a free slot")]
    NoPreferredSlotOpen,

    #[error("team has already reported this match")]
    AlreadyReported,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::Invalid(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::SlotTaken
            | CoreError::NoPreferredSlotOpen
            | CoreError::AlreadyReported
            | CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Invalid(_) => ErrorKind::Invalid,
            CoreError::Database(_) | CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for the specific failure.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::SlotTaken => "slot_taken",
            CoreError::NoPreferredSlotOpen => "no_preferred_slot_open",
            CoreError::AlreadyReported => "already_reported",
            CoreError::Conflict(_) => "conflict",
            CoreError::Invalid(_) => "invalid",
            CoreError::Database(_) | CoreError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "Unhandled engine failure");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (
            status,
            Json(json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_status() {
        assert_eq!(CoreError::SlotTaken.kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::NoPreferredSlotOpen.status(), StatusCode::CONFLICT);
        assert_eq!(CoreError::AlreadyReported.code(), "already_reported");
        assert_eq!(CoreError::NotFound("Match").status(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::forbidden("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::invalid("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CoreError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(CoreError::NotFound("Team").to_string(), "Team not found");
        assert_eq!(CoreError::conflict("dispute already resolved").to_string(), "dispute already resolved");
    }

    #[test]
    fn test_internal_response_hides_detail() {
        let resp = CoreError::Internal("secret table name".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
