//! Service counters exposed in Prometheus text format

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub games_created: IntCounter,
    pub decisions: IntCounterVec,
    pub settlements: IntCounterVec,
    pub lock_timeouts: IntCounterVec,
    pub match_timeouts: IntCounter,
    pub lobby_waiting: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("trust".to_string()), None)?;

        let games_created = IntCounter::with_opts(Opts::new("games_created_total", "Games created by the lobby"))?;
        let decisions = IntCounterVec::new(
            Opts::new("decisions_total", "Round decisions submitted"),
            &["outcome"],
        )?;
        let settlements = IntCounterVec::new(
            Opts::new("settlements_total", "Settlement attempts by result"),
            &["result"],
        )?;
        let lock_timeouts = IntCounterVec::new(
            Opts::new("lock_timeouts_total", "Leases not obtained within their retry budget"),
            &["lock"],
        )?;
        let match_timeouts = IntCounter::with_opts(Opts::new(
            "match_timeouts_total",
            "Lobby waits that ended without an opponent",
        ))?;
        let lobby_waiting = IntGauge::with_opts(Opts::new("lobby_waiting", "Requests waiting in the lobby"))?;

        registry.register(Box::new(games_created.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(lock_timeouts.clone()))?;
        registry.register(Box::new(match_timeouts.clone()))?;
        registry.register(Box::new(lobby_waiting.clone()))?;

        Ok(Self {
            registry,
            games_created,
            decisions,
            settlements,
            lock_timeouts,
            match_timeouts,
            lobby_waiting,
        })
    }

    /// Count a lease timeout under its lock family ("user", "game", ...)
    pub fn lock_timeout(&self, family: &str) {
        self.lock_timeouts.with_label_values(&[family]).inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
