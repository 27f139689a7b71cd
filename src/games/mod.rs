//! Share/steal games: domain types, lobby, round engine, settlement, views

pub mod engine;
pub mod matchmaker;
pub mod settlement;
pub mod types;
pub mod users;
pub mod view;

pub use engine::{DecisionRequest, GameEngine};
pub use matchmaker::{Matchmaker, Matchmaking};
pub use settlement::{compute_payouts, Payouts, SettlementEngine};
pub use types::*;
pub use users::{Menu, RecentGame, UserDirectory};
pub use view::{GameView, GameWatcher};
