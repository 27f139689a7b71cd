//! End-to-end game flows against the in-memory store
//!
//! Covers pairing, the sequential decision rule, the steal cap, round
//! outcomes, single settlement and the long poll.

use std::sync::Arc;
use std::time::Duration;
use trust::errors::{MatchError, TrustError};
use trust::games::matchmaker::LOBBY_SLOT;
use trust::games::{
    Decision, DecisionRequest, Game, GameKey, GameStatus, GameView, Matchmaking, RoundNumber, User,
    UserId, Winner,
};
use trust::lease::{names, LeaseLock, RetryPolicy};
use trust::storage::{MemoryStore, SharedStore};
use trust::{ServiceContainer, TrustConfig};

use Decision::{Share, Steal};

fn setup_with(config: TrustConfig) -> ServiceContainer {
    let store: SharedStore = Arc::new(MemoryStore::new());
    ServiceContainer::with_store(config, store).expect("services")
}

fn setup() -> ServiceContainer {
    setup_with(TrustConfig::fast())
}

async fn user(svc: &ServiceContainer, id: UserId) -> User {
    svc.users().get_or_create(id, None).await.unwrap()
}

/// `waiting` enters the lobby first, `joining` takes them out of it
async fn pair(svc: &ServiceContainer, waiting: UserId, joining: UserId) -> Game {
    let first = user(svc, waiting).await;
    let second = user(svc, joining).await;

    let waiter = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.matchmaker().start_game(&first).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let created = svc.matchmaker().start_game(&second).await.unwrap();
    let joined = waiter.await.unwrap().unwrap();

    let Matchmaking::Created(game) = created else {
        panic!("expected a created game, got {:?}", created);
    };
    assert!(matches!(&joined, Matchmaking::Joined(g) if g.id == game.id));
    game
}

async fn decide(svc: &ServiceContainer, user: UserId, game: &Game, round: usize, decision: Decision) -> Result<Game, TrustError> {
    svc.engine()
        .apply_decision(
            user,
            DecisionRequest {
                game_id: game.id,
                round: RoundNumber::new(round).unwrap(),
                decision,
            },
        )
        .await
}

async fn play_round(svc: &ServiceContainer, game: &Game, round: usize, p1: Decision, p2: Decision) -> Game {
    decide(svc, game.p1, game, round, p1).await.unwrap();
    decide(svc, game.p2, game, round, p2).await.unwrap()
}

async fn balance(svc: &ServiceContainer, id: UserId) -> i64 {
    svc.users().get(id).await.unwrap().unwrap().balance
}

#[tokio::test]
async fn test_pairing_uses_two_distinct_users() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;

    // the joining request is p1, the lobby occupant p2
    assert_eq!(game.p1, 2);
    assert_eq!(game.p2, 1);
    assert_eq!(game.id, 1);
    assert_eq!(game.status, GameStatus::Active);

    // the lobby slot is consumed
    assert_eq!(svc.store().get(LOBBY_SLOT).await.unwrap(), None);

    // a second start returns the running game
    let again = svc.matchmaker().start_game(&user(&svc, 1).await).await.unwrap();
    assert_eq!(again, Matchmaking::Existing(game));
}

#[tokio::test]
async fn test_lonely_user_gets_no_match() {
    let svc = setup();
    let outcome = svc.matchmaker().start_game(&user(&svc, 5).await).await.unwrap();

    assert_eq!(outcome, Matchmaking::NoMatch);
    assert_eq!(svc.store().get(LOBBY_SLOT).await.unwrap(), None);
    assert_eq!(svc.metrics().match_timeouts.get(), 1);
}

#[tokio::test]
async fn test_own_id_in_slot_is_rejected() {
    let svc = setup();
    let store = svc.store();
    store.set(LOBBY_SLOT, "5", None).await.unwrap();

    let err = svc
        .matchmaker()
        .start_game(&user(&svc, 5).await)
        .await
        .unwrap_err();
    assert!(matches!(err, TrustError::Match(MatchError::SelfPairing(5))));
    assert!(!err.is_notice());

    // nothing was created and the slot is left alone
    assert!(store.keys("game:*").await.unwrap().is_empty());
    assert_eq!(store.get(LOBBY_SLOT).await.unwrap().as_deref(), Some("5"));
    assert_eq!(svc.matchmaker().active_game(5).await.unwrap(), None);
}

#[tokio::test]
async fn test_garbage_in_slot_is_rejected() {
    let svc = setup();
    let store = svc.store();
    store.set(LOBBY_SLOT, "abc", None).await.unwrap();

    let err = svc
        .matchmaker()
        .start_game(&user(&svc, 5).await)
        .await
        .unwrap_err();
    assert!(matches!(err, TrustError::Match(MatchError::CorruptSlot(ref raw)) if raw == "abc"));
    assert!(store.keys("game:*").await.unwrap().is_empty());
    assert_eq!(store.get("trust:game:index").await.unwrap(), None);
}

#[tokio::test]
async fn test_next_game_is_the_active_one() {
    let svc = setup();
    let first = pair(&svc, 1, 2).await;
    for round in 1..=4 {
        play_round(&svc, &first, round, Share, Share).await;
    }
    assert_eq!(svc.matchmaker().active_game(1).await.unwrap(), None);

    let second = pair(&svc, 1, 3).await;
    assert_eq!(second.id, 2);
    let active = svc.matchmaker().active_game(1).await.unwrap();
    assert_eq!(active.map(|g| g.id), Some(second.id));
    assert_eq!(svc.matchmaker().active_game(2).await.unwrap(), None);

    // both games stay addressable by id for the player
    assert_eq!(svc.engine().locate(1, first.id).await.unwrap(), Some(first.game_key()));
    assert_eq!(svc.engine().locate(1, second.id).await.unwrap(), Some(second.game_key()));
    assert_eq!(svc.engine().locate(2, second.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_lobby_never_double_books() {
    let svc = setup();
    let mut users = Vec::new();
    for id in 10..16 {
        users.push(user(&svc, id).await);
    }

    let tasks: Vec<_> = users
        .into_iter()
        .map(|u| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.matchmaker().start_game(&u).await })
        })
        .collect();

    let mut games = Vec::new();
    for task in tasks {
        if let Some(game) = task.await.unwrap().unwrap().into_game() {
            games.push(game);
        }
    }

    for game in &games {
        assert_ne!(game.p1, game.p2);
    }
    for id in 10..16 {
        let mut ids: Vec<_> = games
            .iter()
            .filter(|g| g.seat_of(id).is_some())
            .map(|g| g.id)
            .collect();
        ids.dedup();
        assert!(ids.len() <= 1, "user {} is in games {:?}", id, ids);
    }
}

#[tokio::test]
async fn test_out_of_order_decision_is_ignored() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;

    let after = decide(&svc, game.p1, &game, 2, Share).await.unwrap();
    assert_eq!(after.rounds, game.rounds);

    let after = decide(&svc, game.p1, &game, 1, Steal).await.unwrap();
    assert_eq!(after.rounds[0].p1, Some(Steal));

    // a decided round cannot be changed
    let after = decide(&svc, game.p1, &game, 1, Share).await.unwrap();
    assert_eq!(after.rounds[0].p1, Some(Steal));
}

#[tokio::test]
async fn test_steal_cap_rejects_without_mutation() {
    let mut config = TrustConfig::fast();
    config.game.max_steal = 2;
    let svc = setup_with(config);
    let game = pair(&svc, 1, 2).await;

    play_round(&svc, &game, 1, Steal, Share).await;
    play_round(&svc, &game, 2, Steal, Share).await;

    let err = decide(&svc, game.p1, &game, 3, Steal).await.unwrap_err();
    match err {
        TrustError::Validation(msg) => assert_eq!(msg, "You can not steal anymore"),
        other => panic!("unexpected {:?}", other),
    }

    let key = game.game_key();
    let stored = svc.engine().load(&key).await.unwrap().unwrap();
    assert_eq!(stored.rounds[2].p1, None);
    assert_eq!(stored.steals_by(trust::games::Seat::P1), 2);

    // sharing is still allowed
    let stored = decide(&svc, game.p1, &game, 3, Share).await.unwrap();
    assert_eq!(stored.rounds[2].p1, Some(Share));
}

#[tokio::test]
async fn test_round_outcomes() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;

    let g = play_round(&svc, &game, 1, Steal, Steal).await;
    assert_eq!(g.rounds[0].winner(), Winner::House);
    assert_eq!(g.rounds[0].bonus, 0);

    let g = play_round(&svc, &game, 2, Share, Steal).await;
    assert_eq!(g.rounds[1].winner(), Winner::Player2);
    let p1_view = GameView::project(&g, game.p1).unwrap();
    let p2_view = GameView::project(&g, game.p2).unwrap();
    assert_eq!(p1_view.rounds[1].result, 0);
    assert_eq!(p2_view.rounds[1].result, 100);

    let g = play_round(&svc, &game, 3, Share, Share).await;
    assert_eq!(g.rounds[2].winner(), Winner::Both);
    assert_eq!(g.rounds[2].bonus, 10);
    assert_eq!(GameView::project(&g, game.p1).unwrap().rounds[2].result, 55);
}

#[tokio::test]
async fn test_game_settles_exactly_once() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let start_p1 = balance(&svc, game.p1).await;
    let start_p2 = balance(&svc, game.p2).await;

    play_round(&svc, &game, 1, Share, Share).await;
    play_round(&svc, &game, 2, Share, Share).await;
    play_round(&svc, &game, 3, Steal, Share).await;
    let done = play_round(&svc, &game, 4, Steal, Steal).await;

    assert_eq!(done.status, GameStatus::Completed);
    // 55 + 55 + 100 + 0 and 55 + 55 + 0 + 0
    assert_eq!(balance(&svc, game.p1).await, start_p1 + 210);
    assert_eq!(balance(&svc, game.p2).await, start_p2 + 110);

    // replays change nothing
    svc.engine().finalize(&done.game_key()).await.unwrap();
    decide(&svc, game.p1, &game, 4, Share).await.unwrap();
    assert_eq!(balance(&svc, game.p1).await, start_p1 + 210);
    assert_eq!(balance(&svc, game.p2).await, start_p2 + 110);

    let p1 = svc.users().get(game.p1).await.unwrap().unwrap();
    assert_eq!(p1.history.len(), 1);
    assert_eq!(p1.history[0].game_id, game.id);
    assert_eq!(p1.history[0].own_payout, 210);
    assert_eq!(p1.history[0].opponent_id, game.p2);
    assert_eq!(p1.history[0].opponent_payout, 110);

    let menu = svc.users().menu(&p1).await.unwrap();
    assert_eq!(menu.recent_games[0].competitor_coins, 110);
}

#[tokio::test]
async fn test_blocked_settlement_is_retried() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let start_p1 = balance(&svc, game.p1).await;

    // another holder keeps p1's balance lease
    let locks = LeaseLock::new(svc.store());
    let blocker = locks
        .acquire(
            &names::balance(game.p1),
            Duration::from_secs(30),
            RetryPolicy::linear(Duration::from_millis(1), 1),
        )
        .await
        .unwrap();

    for round in 1..=4 {
        play_round(&svc, &game, round, Share, Share).await;
    }
    let key: GameKey = game.game_key();
    let stuck = svc.engine().load(&key).await.unwrap().unwrap();
    assert!(stuck.final_round_completed());
    assert_eq!(stuck.status, GameStatus::Active);
    assert_eq!(balance(&svc, game.p1).await, start_p1);

    locks.release(blocker).await;
    let settled = svc.engine().finalize(&key).await.unwrap();
    assert_eq!(settled.status, GameStatus::Completed);
    assert_eq!(balance(&svc, game.p1).await, start_p1 + 220);
}

#[tokio::test]
async fn test_start_game_settles_a_finished_game_first() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let start_p1 = balance(&svc, game.p1).await;

    let locks = LeaseLock::new(svc.store());
    let blocker = locks
        .acquire(
            &names::balance(game.p1),
            Duration::from_secs(30),
            RetryPolicy::linear(Duration::from_millis(1), 1),
        )
        .await
        .unwrap();
    for round in 1..=4 {
        play_round(&svc, &game, round, Share, Share).await;
    }

    // while the payout is still blocked the finished game is handed back
    let p1 = user(&svc, game.p1).await;
    let outcome = svc.matchmaker().start_game(&p1).await.unwrap();
    assert!(matches!(&outcome, Matchmaking::Existing(g) if g.id == game.id && g.final_round_completed()));
    assert_eq!(balance(&svc, game.p1).await, start_p1);

    // once unblocked it is settled and the player goes on to the lobby
    locks.release(blocker).await;
    let outcome = svc.matchmaker().start_game(&p1).await.unwrap();
    assert_eq!(outcome, Matchmaking::NoMatch);
    assert_eq!(balance(&svc, game.p1).await, start_p1 + 220);
    let stored = svc.engine().load(&game.game_key()).await.unwrap().unwrap();
    assert_eq!(stored.status, GameStatus::Completed);
}

#[tokio::test]
async fn test_hourly_limit_blocks_new_games() {
    let mut config = TrustConfig::fast();
    config.users.hour_limit = 1;
    let svc = setup_with(config);
    let game = pair(&svc, 1, 2).await;

    for round in 1..=4 {
        play_round(&svc, &game, round, Steal, Steal).await;
    }

    let err = svc
        .matchmaker()
        .start_game(&user(&svc, 1).await)
        .await
        .unwrap_err();
    assert!(err.is_notice());
    assert!(err.to_string().contains("game limit"));
}

#[tokio::test]
async fn test_concurrent_players_finish_the_game() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let start = balance(&svc, game.p1).await + balance(&svc, game.p2).await;

    let runs: Vec<_> = [game.p1, game.p2]
        .into_iter()
        .map(|player| {
            let svc = svc.clone();
            let game = game.clone();
            tokio::spawn(async move {
                for round in 1..=4 {
                    decide(&svc, player, &game, round, Share).await.unwrap();
                }
            })
        })
        .collect();
    for run in runs {
        run.await.unwrap();
    }

    let final_game = svc.engine().load(&game.game_key()).await.unwrap().unwrap();
    assert_eq!(final_game.status, GameStatus::Completed);
    let end = balance(&svc, game.p1).await + balance(&svc, game.p2).await;
    assert_eq!(end - start, 440);
}

#[tokio::test]
async fn test_long_poll_wakes_on_change() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let key = game.game_key();

    let mine = decide(&svc, game.p1, &game, 1, Share).await.unwrap();
    let seen = GameView::project(&mine, game.p1).unwrap().fingerprint;

    let poll = {
        let svc = svc.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            svc.watcher()
                .wait_for_change(&key, game.p1, Some(seen.as_str()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    decide(&svc, game.p2, &game, 1, Steal).await.unwrap();

    let view = poll.await.unwrap().unwrap();
    assert_ne!(view.fingerprint, seen);
    assert_eq!(view.rounds[0].competitor_decision, Some(Steal));
}

#[tokio::test]
async fn test_long_poll_gives_up_unchanged() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let view = GameView::project(&game, game.p2).unwrap();

    let again = svc
        .watcher()
        .wait_for_change(&game.game_key(), game.p2, Some(view.fingerprint.as_str()))
        .await
        .unwrap();
    assert_eq!(again, view);

    // a stale fingerprint returns at once
    let fresh = svc
        .watcher()
        .wait_for_change(&game.game_key(), game.p2, Some("stale"))
        .await
        .unwrap();
    assert_eq!(fresh.fingerprint, view.fingerprint);
}

#[tokio::test]
async fn test_outsider_cannot_decide() {
    let svc = setup();
    let game = pair(&svc, 1, 2).await;
    let _ = user(&svc, 3).await;

    let err = decide(&svc, 3, &game, 1, Share).await.unwrap_err();
    assert!(matches!(err, TrustError::NotFound(_)));
}
