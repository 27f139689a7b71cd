//! Trust - share/steal matchmaking service
//!
//! Pairs users into two-player, four-round share/steal games. Shared state
//! lives in a key-value store; lobby, games and balances are guarded by
//! lease locks on that store, and players follow a game through a long-poll
//! view keyed by a content fingerprint.

pub mod api;
pub mod config;
pub mod errors;
pub mod games;
pub mod lease;
pub mod metrics;
pub mod notify;
pub mod rate_limit;
pub mod records;
pub mod repository;
pub mod services;
pub mod storage;

pub use config::TrustConfig;
pub use errors::{TrustError, TrustResult};
pub use services::ServiceContainer;
