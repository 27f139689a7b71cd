//! Round decisions under the per-game lease
//!
//! Every change to a game happens while holding `trust:game<id>:lock`:
//! load, apply the decision, resolve rounds, settle once round 4 is decided,
//! persist. Waiters on the game are signalled after the lease is released.

use crate::config::TrustConfig;
use crate::errors::{TrustError, TrustResult};
use crate::games::settlement::SettlementEngine;
use crate::games::types::{Decision, Game, GameId, GameKey, GameRef, GameStatus, RoundNumber, UserId};
use crate::lease::{names, LeaseHandle, LeaseLock};
use crate::metrics::Metrics;
use crate::notify::{ChangeNotifier, Topic};
use crate::repository::Repository;
use crate::storage::SharedStore;
use std::sync::Arc;

pub const STEAL_LIMIT_NOTICE: &str = "You can not steal anymore";
pub const GAME_NOT_FOUND_NOTICE: &str = "Active Game Not Found.";

/// A validated decision submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionRequest {
    pub game_id: GameId,
    pub round: RoundNumber,
    pub decision: Decision,
}

impl DecisionRequest {
    /// Validate raw path tokens
    pub fn parse(game_id: &str, round: &str, choice: &str) -> TrustResult<Self> {
        let game_id = game_id
            .parse()
            .map_err(|_| TrustError::validation("Invalid game ID."))?;
        let round = round
            .parse()
            .map_err(|_| TrustError::validation("Invalid round id."))?;
        let decision = choice
            .parse()
            .map_err(|_| TrustError::validation("Invalid choice."))?;
        Ok(Self {
            game_id,
            round,
            decision,
        })
    }
}

#[derive(Clone)]
pub struct GameEngine {
    games: Repository<Game>,
    refs: Repository<GameRef>,
    locks: LeaseLock,
    settlement: SettlementEngine,
    notifier: ChangeNotifier,
    config: Arc<TrustConfig>,
    metrics: Arc<Metrics>,
}

impl GameEngine {
    pub fn new(
        store: SharedStore,
        config: Arc<TrustConfig>,
        notifier: ChangeNotifier,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            games: Repository::new(store.clone()),
            refs: Repository::new(store.clone()),
            locks: LeaseLock::new(store.clone()),
            settlement: SettlementEngine::new(store, config.clone(), metrics.clone()),
            notifier,
            config,
            metrics,
        }
    }

    /// The game with this id that `user` plays in, read from their index
    pub async fn locate(&self, user: UserId, game_id: GameId) -> TrustResult<Option<GameKey>> {
        let found = self.refs.get(&GameRef::key_for(user, game_id)).await?;
        Ok(found
            .map(|r| r.game)
            .filter(|key| key.id == game_id && key.involves(user)))
    }

    pub async fn load(&self, key: &GameKey) -> TrustResult<Option<Game>> {
        self.games.get(&key.to_string()).await
    }

    pub async fn apply_decision(&self, user: UserId, request: DecisionRequest) -> TrustResult<Game> {
        let key = self
            .locate(user, request.game_id)
            .await?
            .ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;

        let lease = self.lock_game(key.id).await?;
        let result = self.decide_locked(user, &key, request).await;
        self.locks.release(lease).await;

        if result.is_ok() {
            self.notifier.publish(Topic::Game(key.id));
        }
        result
    }

    /// Re-run resolution and settlement without a decision. Retries a
    /// settlement that failed earlier; a no-op for games that are done.
    pub async fn finalize(&self, key: &GameKey) -> TrustResult<Game> {
        let lease = self.lock_game(key.id).await?;
        let result = async {
            let mut game = self
                .load(key)
                .await?
                .ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;
            if game.is_active() {
                self.resolve_and_settle(&mut game).await?;
            }
            Ok::<_, TrustError>(game)
        }
        .await;
        self.locks.release(lease).await;

        if matches!(&result, Ok(game) if game.status == GameStatus::Completed) {
            self.notifier.publish(Topic::Game(key.id));
        }
        result
    }

    async fn lock_game(&self, id: GameId) -> TrustResult<LeaseHandle> {
        let policy = &self.config.locks.game;
        self.locks
            .acquire(&names::game(id), policy.ttl(), policy.retry_policy())
            .await
            .map_err(|e| {
                self.metrics.lock_timeout("game");
                e.into()
            })
    }

    async fn decide_locked(&self, user: UserId, key: &GameKey, request: DecisionRequest) -> TrustResult<Game> {
        let mut game = self
            .load(key)
            .await?
            .ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;
        let seat = game
            .seat_of(user)
            .ok_or_else(|| TrustError::not_found(GAME_NOT_FOUND_NOTICE))?;

        if request.decision == Decision::Steal && !game.can_steal(seat) {
            self.metrics.decisions.with_label_values(&["rejected"]).inc();
            return Err(TrustError::validation(STEAL_LIMIT_NOTICE));
        }

        if game.record_decision(seat, request.round, request.decision) {
            self.metrics.decisions.with_label_values(&["accepted"]).inc();
            tracing::debug!(
                game_id = game.id,
                user_id = user,
                round = request.round.get(),
                decision = %request.decision,
                "Decision recorded"
            );
        } else {
            self.metrics.decisions.with_label_values(&["ignored"]).inc();
            tracing::debug!(
                game_id = game.id,
                user_id = user,
                round = request.round.get(),
                "Decision out of order or already set"
            );
        }

        self.games.save(&game).await?;
        self.resolve_and_settle(&mut game).await?;
        Ok(game)
    }

    async fn resolve_and_settle(&self, game: &mut Game) -> TrustResult<()> {
        let completed = game.resolve_rounds();
        if completed > 0 {
            tracing::debug!(game_id = game.id, completed, "Rounds resolved");
        }

        if game.is_active() && game.final_round_completed() {
            match self.settlement.settle(game).await {
                Ok(_) => game.status = GameStatus::Completed,
                Err(e) => {
                    tracing::warn!(game_id = game.id, error = %e, "Settlement deferred; game stays active");
                }
            }
        }

        self.games.save(game).await
    }
}
