//! Operational HTTP endpoints.
//!
//! - `GET /health`: liveness, no authentication
//! - `GET /help`: service description, no authentication
//! - `GET /status`: version and stored warning counts, bearer token required

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::moderation::escalation_level;
use crate::store::WarningRecord;
use crate::AppState;

pub const SERVICE_NAME: &str = "awareness";

/// A user's warning count with its place in the escalation cycle.
#[derive(Debug, Serialize)]
pub struct WarningEntry {
    pub user_id: String,
    pub warning_count: u64,
    /// 0 or 1 after a warning, 2 after a mute.
    pub escalation_level: Option<u64>,
}

/// Full status data for the `/status` endpoint.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub service: String,
    pub version: String,
    pub bot_user: String,
    pub keywords: usize,
    pub notification_room: Option<String>,
    pub total_users: usize,
    pub warnings: Vec<WarningEntry>,
}

impl StatusData {
    pub fn new(
        version: String,
        bot_user: String,
        keywords: usize,
        notification_room: Option<String>,
        records: Vec<WarningRecord>,
    ) -> Self {
        let warnings: Vec<WarningEntry> = records
            .into_iter()
            .map(|record| WarningEntry {
                escalation_level: escalation_level(record.warning_count),
                user_id: record.user_id,
                warning_count: record.warning_count,
            })
            .collect();

        Self {
            service: SERVICE_NAME.to_string(),
            version,
            bot_user,
            keywords,
            notification_room,
            total_users: warnings.len(),
            warnings,
        }
    }
}

/// Validate the authorization header against the status auth token.
///
/// Returns `Ok(())` if authorized, or an error response if not.
#[allow(clippy::result_large_err)]
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    // No token configured means the endpoint is disabled
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Status endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided_token) if provided_token == expected_token => Ok(()),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format. Expected: Bearer <token>",
            )
                .into_response()),
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME
    }))
}

async fn help_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": crate::get_bot_version(),
        "description": "Keyword moderation bot for Matrix rooms",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            },
            {
                "path": "/status",
                "method": "GET",
                "description": "Stored warning counts per user",
                "authentication": "Bearer token (STATUS_AUTH_TOKEN)"
            }
        ],
        "features": [
            "Warnings for configured keywords, escalating to a mute every third time",
            "Reports via !report in reply to a message",
            "Reports via a 🚨 reaction",
            "Moderator alerts in a notification room",
            "Moderation config reload on SIGHUP"
        ],
        "configuration": {
            "required_env_vars": ["MATRIX_HOMESERVER_URL", "MATRIX_ACCESS_TOKEN"],
            "optional_env_vars": [
                "MATRIX_USER_ID (default: resolved via /account/whoami)",
                "MODERATION_CONFIG (default: awareness.toml)",
                "PORT (default: 3000)",
                "STATE_DIR (default: current directory)",
                "AUTO_JOIN (default: true)",
                "STATUS_AUTH_TOKEN (default: unset, /status disabled)",
                "RECORDING_ENABLED (default: false)",
                "RECORDING_LOG_PATH (default: recordings.jsonl)"
            ]
        }
    }))
}

async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    if let Err(response) = validate_auth(&headers, &state.status_auth_token) {
        return response;
    }

    let records = match state.store.all().await {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to read warning records: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read warning records")
                .into_response();
        }
    };

    let config = state.moderation_config.snapshot().await;
    let status_data = StatusData::new(
        crate::get_bot_version(),
        state.engine.bot_user().to_string(),
        config.keywords.len(),
        config.notification_room().map(|room| room.to_string()),
        records,
    );

    Json(status_data).into_response()
}

/// Routes for `/health`, `/help` and `/status`.
pub fn status_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    fn status_of(result: Result<(), Response>) -> Option<StatusCode> {
        result.err().map(|response| response.status())
    }

    #[test]
    fn test_validate_auth_success() {
        let auth_token = Some("test-token-123".to_string());
        assert!(validate_auth(&bearer("Bearer test-token-123"), &auth_token).is_ok());
    }

    #[test]
    fn test_validate_auth_wrong_token() {
        let auth_token = Some("test-token-123".to_string());
        assert_eq!(
            status_of(validate_auth(&bearer("Bearer wrong-token"), &auth_token)),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_validate_auth_missing_header() {
        let auth_token = Some("test-token-123".to_string());
        assert_eq!(
            status_of(validate_auth(&HeaderMap::new(), &auth_token)),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_validate_auth_disabled() {
        assert_eq!(
            status_of(validate_auth(&bearer("Bearer test-token"), &None)),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn test_validate_auth_invalid_format() {
        let auth_token = Some("test-token-123".to_string());
        assert_eq!(
            status_of(validate_auth(&bearer("Basic dXNlcjpwYXNz"), &auth_token)),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_status_data() {
        let records = vec![
            WarningRecord {
                user_id: "@alice:x".to_string(),
                warning_count: 3,
            },
            WarningRecord {
                user_id: "@bob:x".to_string(),
                warning_count: 1,
            },
        ];
        let data = StatusData::new(
            "abc12345".to_string(),
            "@awareness:x".to_string(),
            2,
            None,
            records,
        );

        assert_eq!(data.total_users, 2);
        assert_eq!(data.warnings[0].escalation_level, Some(2));
        assert_eq!(data.warnings[1].escalation_level, Some(0));
        insta::assert_json_snapshot!(data, @r###"
        {
          "service": "awareness",
          "version": "abc12345",
          "bot_user": "@awareness:x",
          "keywords": 2,
          "notification_room": null,
          "total_users": 2,
          "warnings": [
            {
              "user_id": "@alice:x",
              "warning_count": 3,
              "escalation_level": 2
            },
            {
              "user_id": "@bob:x",
              "warning_count": 1,
              "escalation_level": 0
            }
          ]
        }
        "###);
    }
}
