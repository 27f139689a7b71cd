//! Named lease locks on the record store
//!
//! A lease is a string key holding a random token with a TTL. Acquisition is
//! set-if-absent retried on a linear backoff; release deletes the key only
//! while it still holds our token, so a lease that expired and was taken by
//! someone else is left alone.

use crate::errors::LockError;
use crate::storage::SharedStore;
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// Attempt budget and backoff between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn linear(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt. With jitter the delay lies in
    /// `[backoff/2, backoff]`.
    pub fn delay(&self, rng: &mut impl Rng) -> Duration {
        let backoff_ms = self.backoff.as_millis() as u64;
        if !self.jitter || backoff_ms <= 1 {
            return self.backoff;
        }
        let half_ms = backoff_ms / 2;
        Duration::from_millis(half_ms.saturating_add(rng.gen_range(0..=half_ms)))
    }
}

/// Proof of a held lease
#[derive(Debug)]
#[must_use = "a lease must be released"]
pub struct LeaseHandle {
    name: String,
    token: String,
}

#[derive(Clone)]
pub struct LeaseLock {
    store: SharedStore,
}

impl LeaseLock {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        policy: RetryPolicy,
    ) -> Result<LeaseHandle, LockError> {
        let token = Uuid::new_v4().to_string();
        let attempts = policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            if self.store.set_nx(name, &token, Some(ttl)).await? {
                tracing::trace!(lock = name, attempt, "Lease acquired");
                return Ok(LeaseHandle {
                    name: name.to_string(),
                    token,
                });
            }
            if attempt < attempts {
                let delay = policy.delay(&mut rand::thread_rng());
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(lock = name, attempts, "Lease not obtained");
        Err(LockError::Timeout {
            name: name.to_string(),
            attempts,
        })
    }

    /// Release a lease. Returns false if it had already expired or been
    /// taken over; failures are logged and never propagated.
    pub async fn release(&self, handle: LeaseHandle) -> bool {
        match self.store.del_if_eq(&handle.name, &handle.token).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(lock = %handle.name, "Lease already expired at release");
                false
            }
            Err(e) => {
                tracing::error!(lock = %handle.name, error = %e, "Failed to release lease");
                false
            }
        }
    }
}

/// Lock key names
pub mod names {
    use crate::games::types::{GameId, UserId};

    pub const LOBBY: &str = "trust:default_lobby:lock";

    pub fn user(id: UserId) -> String {
        format!("trust:user{}:lock", id)
    }

    pub fn balance(id: UserId) -> String {
        format!("trust:user{}:lock_balance", id)
    }

    pub fn game(id: GameId) -> String {
        format!("trust:game{}:lock", id)
    }
}
