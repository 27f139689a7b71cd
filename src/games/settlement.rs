//! Game payouts and balance crediting
//!
//! Payout arithmetic is pure and shared with the game view. Crediting takes
//! both players' balance leases in ascending user id order. Each player's
//! new balance and a `settled:<game id>` field go into their user record in
//! one write, so a replay after a partial failure credits only whoever is
//! still missing.

use crate::config::TrustConfig;
use crate::errors::{TrustError, TrustResult};
use crate::games::types::{Game, GameId, GameSummary, Seat, User};
use crate::lease::{names, LeaseHandle, LeaseLock};
use crate::metrics::Metrics;
use crate::records::Record;
use crate::storage::SharedStore;
use std::sync::Arc;

/// Coin totals of one game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Payouts {
    pub p1: i64,
    pub p2: i64,
    pub house: i64,
}

impl Payouts {
    pub fn for_seat(&self, seat: Seat) -> i64 {
        match seat {
            Seat::P1 => self.p1,
            Seat::P2 => self.p2,
        }
    }
}

/// Sum per-round payouts over completed rounds
pub fn compute_payouts(game: &Game) -> Payouts {
    let per_round = game.per_round_coins();
    game.rounds
        .iter()
        .filter(|r| r.is_completed())
        .fold(Payouts::default(), |acc, round| Payouts {
            p1: acc.p1 + round.payout(Seat::P1, per_round),
            p2: acc.p2 + round.payout(Seat::P2, per_round),
            house: acc.house + round.house_take(per_round),
        })
}

/// User record field set in the same write that credits the game
pub fn settled_field(game: GameId) -> String {
    format!("settled:{}", game)
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: SharedStore,
    locks: LeaseLock,
    config: Arc<TrustConfig>,
    metrics: Arc<Metrics>,
}

impl SettlementEngine {
    pub fn new(store: SharedStore, config: Arc<TrustConfig>, metrics: Arc<Metrics>) -> Self {
        Self {
            locks: LeaseLock::new(store.clone()),
            store,
            config,
            metrics,
        }
    }

    /// Credit both players of a finished game. On error nothing is lost:
    /// players already credited carry their settled field and the rest are
    /// credited by the next call.
    pub async fn settle(&self, game: &Game) -> TrustResult<Payouts> {
        let payouts = compute_payouts(game);

        let leases = match self.lock_balances(game).await {
            Ok(leases) => leases,
            Err(e) => {
                self.metrics.settlements.with_label_values(&["deferred"]).inc();
                return Err(e);
            }
        };

        let mut result = Ok(());
        for seat in [Seat::P1, Seat::P2] {
            if let Err(e) = self.credit(game, seat, &payouts).await {
                result = Err(e);
                break;
            }
        }

        for lease in leases.into_iter().rev() {
            self.locks.release(lease).await;
        }

        match result {
            Ok(()) => {
                self.metrics.settlements.with_label_values(&["ok"]).inc();
                tracing::info!(
                    game_id = game.id,
                    p1 = game.p1,
                    p2 = game.p2,
                    p1_payout = payouts.p1,
                    p2_payout = payouts.p2,
                    house = payouts.house,
                    "Game settled"
                );
                Ok(payouts)
            }
            Err(e) => {
                self.metrics.settlements.with_label_values(&["failed"]).inc();
                Err(e)
            }
        }
    }

    async fn lock_balances(&self, game: &Game) -> TrustResult<Vec<LeaseHandle>> {
        let policy = &self.config.locks.balance;
        let mut ids = vec![game.p1, game.p2];
        ids.sort_unstable();
        ids.dedup();

        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            match self
                .locks
                .acquire(&names::balance(id), policy.ttl(), policy.retry_policy())
                .await
            {
                Ok(lease) => held.push(lease),
                Err(e) => {
                    self.metrics.lock_timeout("balance");
                    tracing::warn!(game_id = game.id, user_id = id, error = %e, "Balance lease not obtained");
                    for lease in held.into_iter().rev() {
                        self.locks.release(lease).await;
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(held)
    }

    /// Returns false if this player was already credited
    async fn credit(&self, game: &Game, seat: Seat, payouts: &Payouts) -> TrustResult<bool> {
        let user_id = game.player(seat);
        let key = User::key_for(user_id);
        let fields = self.store.hget_all(&key).await?;
        if fields.is_empty() {
            return Err(TrustError::not_found(format!("user {} not found for settlement", user_id)));
        }

        let settled = settled_field(game.id);
        if fields.contains_key(&settled) {
            tracing::debug!(game_id = game.id, user_id, "Already credited");
            return Ok(false);
        }

        let mut user = User::decode(&fields)?;
        let own = payouts.for_seat(seat);
        let opponent = seat.other();
        user.balance += own;
        user.push_history(
            GameSummary {
                game_id: game.id,
                own_payout: own,
                opponent_id: game.player(opponent),
                opponent_payout: payouts.for_seat(opponent),
            },
            self.config.users.history_cap,
        );

        let mut update = user.encode();
        update.insert(settled, "1".to_string());
        self.store.hset(&key, &update).await?;
        Ok(true)
    }
}
