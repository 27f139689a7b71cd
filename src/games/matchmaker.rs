//! Single-slot lobby
//!
//! The lobby is one string key holding the id of the waiting user. A request
//! either takes the waiting user out of the slot and creates a game with
//! them, or puts itself into the slot and waits for someone else to do that.

use crate::config::TrustConfig;
use crate::errors::{MatchError, TrustError, TrustResult};
use crate::games::engine::GameEngine;
use crate::games::types::{Game, GameRef, User, UserId};
use crate::lease::{names, LeaseLock};
use crate::metrics::Metrics;
use crate::notify::{ChangeNotifier, Topic};
use crate::rate_limit::{bucket_key, RateLimiter};
use crate::repository::{next_id, Repository};
use crate::storage::SharedStore;
use std::sync::Arc;

pub const LOBBY_SLOT: &str = "trust:default_lobby:name";
pub const GAME_INDEX: &str = "trust:game:index";
pub const RATE_LIMIT_NOTICE: &str = "You've reached your game limit for this hour and can't start a new game just yet. Please try again in an hour to continue playing!!";
pub const NO_MATCH_NOTICE: &str = "No active game found.";

/// Index entries read when resuming. A player joins no new game while one is
/// active, so an active game is always their newest.
const RECENT_GAMES: usize = 1;

/// Outcome of a start-game request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matchmaking {
    /// The user already had an active game
    Existing(Game),
    /// The user took the waiting opponent and created the game
    Created(Game),
    /// The user waited in the lobby and an opponent created the game
    Joined(Game),
    /// The wait ran out
    NoMatch,
}

impl Matchmaking {
    pub fn into_game(self) -> Option<Game> {
        match self {
            Matchmaking::Existing(g) | Matchmaking::Created(g) | Matchmaking::Joined(g) => Some(g),
            Matchmaking::NoMatch => None,
        }
    }
}

#[derive(Clone)]
pub struct Matchmaker {
    store: SharedStore,
    games: Repository<Game>,
    refs: Repository<GameRef>,
    engine: GameEngine,
    locks: LeaseLock,
    limiter: RateLimiter,
    notifier: ChangeNotifier,
    config: Arc<TrustConfig>,
    metrics: Arc<Metrics>,
}

impl Matchmaker {
    pub fn new(
        store: SharedStore,
        engine: GameEngine,
        config: Arc<TrustConfig>,
        notifier: ChangeNotifier,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            games: Repository::new(store.clone()),
            refs: Repository::new(store.clone()),
            engine,
            locks: LeaseLock::new(store.clone()),
            limiter: RateLimiter::new(store.clone()),
            store,
            notifier,
            config,
            metrics,
        }
    }

    pub async fn start_game(&self, user: &User) -> TrustResult<Matchmaking> {
        let policy = &self.config.locks.user;
        let lease = self
            .locks
            .acquire(&names::user(user.id), policy.ttl(), policy.retry_policy())
            .await
            .map_err(|e| {
                self.metrics.lock_timeout("user");
                TrustError::from(e)
            })?;

        let result = self.start_locked(user).await;
        self.locks.release(lease).await;
        result
    }

    /// The active game `user` plays in, either seat
    pub async fn active_game(&self, user: UserId) -> TrustResult<Option<Game>> {
        let refs = self.refs.scan(&GameRef::pattern_for(user), RECENT_GAMES).await?;
        let keys: Vec<String> = refs.iter().map(|r| r.game.to_string()).collect();
        let games = self.games.get_many(&keys).await?;
        Ok(games
            .into_iter()
            .find(|g| g.is_active() && g.seat_of(user).is_some()))
    }

    async fn start_locked(&self, user: &User) -> TrustResult<Matchmaking> {
        if let Some(game) = self.active_game(user.id).await? {
            if !game.final_round_completed() {
                tracing::debug!(user_id = user.id, game_id = game.id, "Resuming active game");
                return Ok(Matchmaking::Existing(game));
            }

            // All rounds are decided but the payout was deferred
            match self.engine.finalize(&game.game_key()).await {
                Ok(done) if !done.is_active() => {
                    tracing::info!(user_id = user.id, game_id = done.id, "Settled finished game before matchmaking");
                }
                Ok(pending) => return Ok(Matchmaking::Existing(pending)),
                Err(e) => {
                    tracing::warn!(user_id = user.id, game_id = game.id, error = %e, "Finished game still unsettled");
                    return Ok(Matchmaking::Existing(game));
                }
            }
        }

        let bucket = bucket_key(user.id);
        if self
            .limiter
            .is_limited(&bucket, user.hour_limit, self.config.rate_limit.window())
            .await?
        {
            tracing::warn!(user_id = user.id, "Hourly game limit reached");
            return Err(TrustError::validation(RATE_LIMIT_NOTICE));
        }

        let policy = &self.config.locks.lobby;
        let lobby = self
            .locks
            .acquire(names::LOBBY, policy.ttl(), policy.retry_policy())
            .await
            .map_err(|e| {
                self.metrics.lock_timeout("lobby");
                TrustError::from(e)
            })?;
        let paired = self.pair_or_enqueue(user.id).await;
        self.locks.release(lobby).await;

        match paired? {
            Some(game) => {
                self.limiter.burn_token(&bucket).await;
                self.metrics.games_created.inc();
                self.notifier.publish(Topic::User(game.p2));
                tracing::info!(game_id = game.id, p1 = game.p1, p2 = game.p2, "Game created");
                Ok(Matchmaking::Created(game))
            }
            None => {
                self.metrics.lobby_waiting.inc();
                let waited = self.wait_for_opponent(user.id).await;
                self.metrics.lobby_waiting.dec();

                match waited? {
                    Some(game) => {
                        self.limiter.burn_token(&bucket).await;
                        tracing::info!(game_id = game.id, user_id = user.id, "Joined game from lobby");
                        Ok(Matchmaking::Joined(game))
                    }
                    None => {
                        self.metrics.match_timeouts.inc();
                        tracing::info!(user_id = user.id, "No opponent found");
                        Ok(Matchmaking::NoMatch)
                    }
                }
            }
        }
    }

    /// Under the lobby lease: pair with the waiting user, or take the slot
    async fn pair_or_enqueue(&self, user: UserId) -> TrustResult<Option<Game>> {
        let Some(raw) = self.store.get(LOBBY_SLOT).await? else {
            self.store
                .set(LOBBY_SLOT, &user.to_string(), Some(self.config.lobby.slot_ttl()))
                .await?;
            tracing::debug!(user_id = user, "Waiting in lobby");
            return Ok(None);
        };

        let waiting: UserId = raw
            .parse()
            .map_err(|_| MatchError::CorruptSlot(raw.clone()))?;
        if waiting == user {
            return Err(MatchError::SelfPairing(user).into());
        }

        self.store.del(LOBBY_SLOT).await?;
        let id = next_id(&self.store, GAME_INDEX).await?;
        let game = Game::new(id, user, waiting, &self.config.game);
        for entry in GameRef::for_players(&game) {
            self.refs.save(&entry).await?;
        }
        self.games.save(&game).await?;
        Ok(Some(game))
    }

    async fn wait_for_opponent(&self, user: UserId) -> TrustResult<Option<Game>> {
        let interval = self.config.lobby.wait_interval();
        for _ in 0..self.config.lobby.wait_attempts {
            self.notifier.wait(Topic::User(user), interval).await;
            if let Some(game) = self.active_game(user).await? {
                return Ok(Some(game));
            }
        }

        // Give the slot back. If it is no longer ours an opponent may have
        // taken it just now, so look once more.
        if self.store.del_if_eq(LOBBY_SLOT, &user.to_string()).await? {
            return Ok(None);
        }
        self.active_game(user).await
    }
}
