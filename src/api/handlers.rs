//! Request Handlers
//!
//! Thin adapters from HTTP to the game services. Each handler resolves the
//! caller, runs one service operation and maps player notices to a 200
//! `{"notice": ...}` body.

use super::{
    errors::ApiError,
    middleware::Caller,
    models::*,
};
use crate::errors::{TrustError, TrustResult};
use crate::games::{DecisionRequest, GameView, Matchmaking, Menu, User};
use crate::services::ServiceContainer;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

pub const GAME_NOT_FOUND_NOTICE: &str = "Game Not Found.";

/// Shared application state
pub struct AppState {
    pub services: ServiceContainer,
    pub version: String,
}

impl AppState {
    pub fn new(services: ServiceContainer) -> Self {
        Self {
            services,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<Reply<T>>, ApiError>;

/// Turn a service result into a reply; notices become 200 bodies
fn reply<T>(caller: &Caller, result: TrustResult<T>) -> ApiResult<T> {
    match result {
        Ok(data) => Ok(Json(Reply::Data(data))),
        Err(e) if e.is_notice() => Ok(Json(Reply::notice(e.to_string()))),
        Err(e) => Err(ApiError::from_trust(caller.request_id.clone(), &e)),
    }
}

async fn load_caller(state: &AppState, caller: &Caller) -> TrustResult<User> {
    state
        .services
        .users()
        .get_or_create(caller.user_id, caller.display_name.as_deref())
        .await
}

fn project(game: &crate::games::Game, caller: &Caller) -> TrustResult<GameView> {
    GameView::project(game, caller.user_id).ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
    })
}

/// GET /menu
pub async fn menu_handler(State(state): State<Arc<AppState>>, caller: Caller) -> ApiResult<Menu> {
    let result = async {
        let user = load_caller(&state, &caller).await?;
        state.services.users().menu(&user).await
    }
    .await;
    reply(&caller, result)
}

/// POST /game
pub async fn start_game_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<StartGameResponse> {
    let result = async {
        let user = load_caller(&state, &caller).await?;
        let outcome = state.services.matchmaker().start_game(&user).await?;
        let name = StartGameResponse::outcome_name(&outcome);
        match outcome {
            Matchmaking::NoMatch => Err(TrustError::not_found(crate::games::matchmaker::NO_MATCH_NOTICE)),
            Matchmaking::Existing(game) | Matchmaking::Created(game) | Matchmaking::Joined(game) => {
                Ok(StartGameResponse {
                    outcome: name,
                    game: project(&game, &caller)?,
                })
            }
        }
    }
    .await;
    reply(&caller, result)
}

/// GET /game/:game_id?sum=<fingerprint>
pub async fn game_update_handler(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Query(query): Query<GameUpdateQuery>,
    caller: Caller,
) -> ApiResult<GameView> {
    let result = async {
        let game_id = game_id
            .parse()
            .map_err(|_| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;
        let engine = state.services.engine();
        let key = engine
            .locate(caller.user_id, game_id)
            .await?
            .ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;

        // Retry a settlement that did not go through on the last decision
        if let Some(game) = engine.load(&key).await? {
            if game.is_active() && game.final_round_completed() {
                engine.finalize(&key).await?;
            }
        }

        state
            .services
            .watcher()
            .wait_for_change(&key, caller.user_id, query.sum.as_deref())
            .await
    }
    .await;
    reply(&caller, result)
}

/// POST /game/:game_id/round/:round/:choice
pub async fn decision_handler(
    State(state): State<Arc<AppState>>,
    Path((game_id, round, choice)): Path<(String, String, String)>,
    caller: Caller,
) -> ApiResult<GameView> {
    let result = async {
        let request = DecisionRequest::parse(&game_id, &round, &choice)?;
        let game = state
            .services
            .engine()
            .apply_decision(caller.user_id, request)
            .await?;
        project(&game, &caller)
    }
    .await;
    reply(&caller, result)
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.services.metrics().render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
