//! In-process change signals
//!
//! Wakes tasks waiting on a game or user as soon as a handler in this process
//! changes it. The record store stays the source of truth: a signal only cuts
//! a poll interval short, so waiters always re-read after waking and still
//! time out on their own interval.

use crate::games::types::{GameId, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Game(GameId),
    User(UserId),
}

#[derive(Clone, Default)]
pub struct ChangeNotifier {
    topics: Arc<DashMap<Topic, Arc<Notify>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, topic: Topic) {
        if let Some(notify) = self.topics.get(&topic) {
            notify.notify_waiters();
        }
    }

    /// Wait for a publish on `topic` or until `timeout` elapses.
    /// Returns whether a signal arrived.
    pub async fn wait(&self, topic: Topic, timeout: Duration) -> bool {
        let notify = self
            .topics
            .entry(topic)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        let woken = tokio::time::timeout(timeout, notify.notified()).await.is_ok();

        // Drop the entry once we were the last waiter
        self.topics
            .remove_if(&topic, |_, n| Arc::strong_count(n) <= 2 && Arc::ptr_eq(n, &notify));
        woken
    }
}
