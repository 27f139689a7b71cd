//! API Response Models

use crate::games::{GameView, Matchmaking};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Message shown to the player instead of a result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoticeResponse {
    pub notice: String,
}

/// Either a payload or a player notice, both served with status 200
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Data(T),
    Notice(NoticeResponse),
}

impl<T> Reply<T> {
    pub fn notice(message: impl Into<String>) -> Self {
        Reply::Notice(NoticeResponse {
            notice: message.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StartGameResponse {
    /// existing, created or joined
    pub outcome: &'static str,
    pub game: GameView,
}

impl StartGameResponse {
    pub fn outcome_name(outcome: &Matchmaking) -> &'static str {
        match outcome {
            Matchmaking::Existing(_) => "existing",
            Matchmaking::Created(_) => "created",
            Matchmaking::Joined(_) => "joined",
            Matchmaking::NoMatch => "no_match",
        }
    }
}

/// Query of the long-poll endpoint
#[derive(Debug, Default, Deserialize)]
pub struct GameUpdateQuery {
    /// Fingerprint of the view the client already has
    pub sum: Option<String>,
}
