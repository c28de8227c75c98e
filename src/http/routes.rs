//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::store::ScoreSnapshot;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/scores", get(leaderboard_handler))
        .route("/scores/:player_id", get(score_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS from a comma separated origin list; `*` allows any origin
fn cors_layer(client_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.split(',').any(|s| s.trim() == "*") {
        return base.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    base.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
    })
}

// ============================================================================
// Score endpoints
// ============================================================================

async fn score_handler(
    State(state): State<AppState>,
    Path(player_id): Path<Uuid>,
) -> Result<Json<ScoreSnapshot>, AppError> {
    state
        .scores
        .get(&player_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no scores for player {player_id}")))
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<ScoreSnapshot>>, AppError> {
    let limit = query.limit.unwrap_or(10);
    if limit == 0 || limit > 100 {
        return Err(AppError::BadRequest("limit must be between 1 and 100".to_string()));
    }
    Ok(Json(state.scores.leaderboard(limit)))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".into(),
            client_origin: "*".into(),
            game: Default::default(),
        };
        AppState::with_parts(
            config,
            Arc::new(crate::store::InMemoryScoreStore::new()),
            Arc::new(crate::util::time::ManualClock::new(0)),
        )
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_player_scores_are_not_found() {
        let router = build_router(test_state());
        let uri = format!("/scores/{}", Uuid::from_u128(5));
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recorded_scores_are_served() {
        let state = test_state();
        let id = Uuid::from_u128(9);
        state.scores.record_game(id, "ada", 14);
        let router = build_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/scores/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn leaderboard_limit_is_validated() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/scores?limit=0").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
