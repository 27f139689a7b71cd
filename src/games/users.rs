//! User directory: first-contact creation and the menu profile

use crate::config::TrustConfig;
use crate::errors::{TrustError, TrustResult};
use crate::games::types::{GameId, User, UserId};
use crate::lease::{names, LeaseLock};
use crate::records::Record;
use crate::repository::Repository;
use crate::storage::SharedStore;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

pub const AVATAR_COUNT: u32 = 11;

/// One finished game as shown in the menu
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecentGame {
    pub game_id: GameId,
    pub your_coins: i64,
    pub competitor_coins: i64,
    pub competitor_id: UserId,
    /// Missing when the competitor record cannot be read
    pub competitor_name: Option<String>,
    pub competitor_avatar_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Menu {
    pub user_id: UserId,
    pub display_name: String,
    pub balance: i64,
    pub avatar_id: u32,
    pub hour_limit: i64,
    pub recent_games: Vec<RecentGame>,
}

#[derive(Clone)]
pub struct UserDirectory {
    store: SharedStore,
    users: Repository<User>,
    locks: LeaseLock,
    config: Arc<TrustConfig>,
}

impl UserDirectory {
    pub fn new(store: SharedStore, config: Arc<TrustConfig>) -> Self {
        Self {
            users: Repository::new(store.clone()),
            locks: LeaseLock::new(store.clone()),
            store,
            config,
        }
    }

    pub async fn get(&self, id: UserId) -> TrustResult<Option<User>> {
        self.users.get(&User::key_for(id)).await
    }

    /// Load a user, creating them with the configured defaults on first
    /// contact. Creation runs under the user's balance lease so it cannot
    /// overwrite a concurrent settlement.
    pub async fn get_or_create(&self, id: UserId, display_name: Option<&str>) -> TrustResult<User> {
        if let Some(user) = self.get(id).await? {
            return Ok(user);
        }

        let policy = &self.config.locks.balance;
        let lease = self
            .locks
            .acquire(&names::balance(id), policy.ttl(), policy.retry_policy())
            .await
            .map_err(TrustError::from)?;

        let result = async {
            if let Some(user) = self.get(id).await? {
                return Ok(user);
            }
            let name = display_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("Player {}", id));
            let avatar = rand::thread_rng().gen_range(1..=AVATAR_COUNT);
            let user = User::new(id, name, avatar, &self.config.users);
            self.users.save(&user).await?;
            tracing::info!(user_id = id, balance = user.balance, "User created");
            Ok::<_, TrustError>(user)
        }
        .await;

        self.locks.release(lease).await;
        result
    }

    /// Profile plus the most recent games, competitors loaded in one read
    pub async fn menu(&self, user: &User) -> TrustResult<Menu> {
        let recent: Vec<_> = user
            .history
            .iter()
            .take(self.config.users.menu_history)
            .collect();

        let keys: Vec<String> = recent.iter().map(|s| User::key_for(s.opponent_id)).collect();
        let competitors = self.store.hget_all_many(&keys).await?;

        let recent_games = recent
            .into_iter()
            .zip(competitors)
            .map(|(summary, fields)| {
                let competitor = if fields.is_empty() {
                    None
                } else {
                    User::decode(&fields)
                        .map_err(|e| {
                            tracing::warn!(user_id = summary.opponent_id, error = %e, "Unreadable competitor record");
                        })
                        .ok()
                };
                RecentGame {
                    game_id: summary.game_id,
                    your_coins: summary.own_payout,
                    competitor_coins: summary.opponent_payout,
                    competitor_id: summary.opponent_id,
                    competitor_name: competitor.as_ref().map(|c| c.display_name.clone()),
                    competitor_avatar_id: competitor.as_ref().map(|c| c.avatar_id),
                }
            })
            .collect();

        Ok(Menu {
            user_id: user.id,
            display_name: user.display_name.clone(),
            balance: user.balance,
            avatar_id: user.avatar_id,
            hour_limit: user.hour_limit,
            recent_games,
        })
    }
}
