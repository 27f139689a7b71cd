//! Per-player game view and long-poll
//!
//! The fingerprint is a hex SHA-256 over the view's tracked fields in a
//! fixed order. Clients send back the last fingerprint they saw; the watcher
//! holds the request until the fingerprint changes or the poll budget runs
//! out.

use crate::config::LongPollConfig;
use crate::errors::{TrustError, TrustResult};
use crate::games::types::{Decision, Game, GameId, GameKey, RoundNumber, RoundStatus, UserId};
use crate::notify::{ChangeNotifier, Topic};
use crate::repository::Repository;
use crate::storage::SharedStore;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoundView {
    pub round: usize,
    pub coins: i64,
    pub your_decision: Option<Decision>,
    /// Withheld until the viewer has decided this round
    pub competitor_decision: Option<Decision>,
    pub result: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GameView {
    pub game_id: GameId,
    pub status: String,
    pub competitor_id: UserId,
    pub rounds: Vec<RoundView>,
    pub total_result: i64,
    pub total_coins: i64,
    /// Next round to play, -1 once all four are decided
    pub active_round: i32,
    pub steal_count: u32,
    pub steal_active: bool,
    pub fingerprint: String,
}

impl GameView {
    /// `None` if `viewer` is not a player of `game`
    pub fn project(game: &Game, viewer: UserId) -> Option<Self> {
        let seat = game.seat_of(viewer)?;
        let per_round = game.per_round_coins();

        let rounds: Vec<RoundView> = RoundNumber::all()
            .map(|n| {
                let round = game.round(n);
                let own = round.decision(seat);
                RoundView {
                    round: n.get(),
                    coins: per_round,
                    your_decision: own,
                    competitor_decision: own.and(round.decision(seat.other())),
                    result: round.payout(seat, per_round),
                    completed: round.status == RoundStatus::Completed,
                }
            })
            .collect();

        let total_result = rounds.iter().map(|r| r.result.max(0)).sum();
        let active_round = game
            .next_round_for(seat)
            .map_or(-1, |n| n.get() as i32);
        let steals = game.steals_by(seat);

        let mut view = Self {
            game_id: game.id,
            status: game.status.as_str().to_string(),
            competitor_id: game.player(seat.other()),
            rounds,
            total_result,
            total_coins: game.coins,
            active_round,
            steal_count: game.max_steal.saturating_sub(steals),
            steal_active: steals < game.max_steal,
            fingerprint: String::new(),
        };
        view.fingerprint = view.compute_fingerprint();
        Some(view)
    }

    fn compute_fingerprint(&self) -> String {
        fn decision(d: Option<Decision>) -> &'static str {
            d.map_or("", |d| d.as_str())
        }

        let mut hasher = Sha256::new();
        hasher.update(self.game_id.to_string());
        hasher.update(&self.status);
        for r in &self.rounds {
            hasher.update(r.coins.to_string());
        }
        for r in &self.rounds {
            hasher.update(decision(r.your_decision));
        }
        for r in &self.rounds {
            hasher.update(decision(r.competitor_decision));
        }
        for r in &self.rounds {
            hasher.update(r.result.to_string());
        }
        hasher.update(self.total_result.to_string());
        hasher.update(self.total_coins.to_string());
        hasher.update(self.active_round.to_string());
        hex::encode(hasher.finalize())
    }
}

#[derive(Clone)]
pub struct GameWatcher {
    games: Repository<Game>,
    notifier: ChangeNotifier,
    config: LongPollConfig,
}

impl GameWatcher {
    pub fn new(store: SharedStore, notifier: ChangeNotifier, config: LongPollConfig) -> Self {
        Self {
            games: Repository::new(store),
            notifier,
            config,
        }
    }

    /// Current view, held back while it still matches `previous`
    pub async fn wait_for_change(
        &self,
        key: &GameKey,
        viewer: UserId,
        previous: Option<&str>,
    ) -> TrustResult<GameView> {
        let mut view = self.read(key, viewer).await?;
        for _ in 0..self.config.max_iterations {
            if previous != Some(view.fingerprint.as_str()) {
                return Ok(view);
            }
            self.notifier
                .wait(Topic::Game(key.id), self.config.interval())
                .await;
            view = self.read(key, viewer).await?;
        }
        tracing::trace!(game_id = key.id, user_id = viewer, "Long poll ran out unchanged");
        Ok(view)
    }

    async fn read(&self, key: &GameKey, viewer: UserId) -> TrustResult<GameView> {
        let game = self
            .games
            .get(&key.to_string())
            .await?
            .ok_or_else(|| TrustError::not_found("Game Not Found."))?;
        GameView::project(&game, viewer).ok_or_else(|| TrustError::not_found("Game Not Found."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::games::types::Seat;

    fn game() -> Game {
        Game::new(5, 1, 2, &GameConfig::default())
    }

    fn round(n: usize) -> RoundNumber {
        RoundNumber::new(n).unwrap()
    }

    #[test]
    fn test_competitor_decision_is_withheld() {
        let mut g = game();
        g.record_decision(Seat::P2, round(1), Decision::Steal);

        let view = GameView::project(&g, 1).unwrap();
        assert_eq!(view.rounds[0].competitor_decision, None);
        assert_eq!(view.active_round, 1);

        g.record_decision(Seat::P1, round(1), Decision::Share);
        g.resolve_rounds();
        let view = GameView::project(&g, 1).unwrap();
        assert_eq!(view.rounds[0].competitor_decision, Some(Decision::Steal));
        assert_eq!(view.rounds[0].result, 0);
        assert_eq!(view.active_round, 2);

        let other = GameView::project(&g, 2).unwrap();
        assert_eq!(other.rounds[0].result, 100);
        assert_eq!(other.total_result, 100);
        assert_eq!(other.competitor_id, 1);
    }

    #[test]
    fn test_outsider_has_no_view() {
        assert!(GameView::project(&game(), 3).is_none());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let mut g = game();
        let before = GameView::project(&g, 1).unwrap().fingerprint;
        assert_eq!(before, GameView::project(&g, 1).unwrap().fingerprint);
        assert_eq!(before.len(), 64);

        // opponent decision is hidden from this viewer, so nothing changes
        g.record_decision(Seat::P2, round(1), Decision::Share);
        assert_eq!(before, GameView::project(&g, 1).unwrap().fingerprint);

        g.record_decision(Seat::P1, round(1), Decision::Share);
        let after = GameView::project(&g, 1).unwrap().fingerprint;
        assert_ne!(before, after);

        g.resolve_rounds();
        assert_ne!(after, GameView::project(&g, 1).unwrap().fingerprint);
    }

    #[test]
    fn test_steal_counters() {
        let mut g = Game::new(5, 1, 2, &GameConfig { max_steal: 2, ..GameConfig::default() });
        g.record_decision(Seat::P1, round(1), Decision::Steal);
        let view = GameView::project(&g, 1).unwrap();
        assert_eq!(view.steal_count, 1);
        assert!(view.steal_active);

        g.record_decision(Seat::P1, round(2), Decision::Steal);
        let view = GameView::project(&g, 1).unwrap();
        assert_eq!(view.steal_count, 0);
        assert!(!view.steal_active);
    }

    #[test]
    fn test_all_decided_has_no_active_round() {
        let mut g = game();
        for n in 1..=4 {
            g.record_decision(Seat::P1, round(n), Decision::Share);
        }
        assert_eq!(GameView::project(&g, 1).unwrap().active_round, -1);
        assert_eq!(GameView::project(&g, 2).unwrap().active_round, 1);
    }
}
