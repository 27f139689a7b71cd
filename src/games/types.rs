use crate::config::{GameConfig, UserConfig};
use crate::errors::CodecError;
use crate::records::{FieldReader, FieldWriter, Record};
use crate::storage::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rounds per game
pub const ROUNDS: usize = 4;

/// Share/share bonus is the coin pool divided by this
pub const BONUS_DIVISOR: i64 = 40;

pub type UserId = i64;
pub type GameId = u64;

/// A player's choice for one round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Share,
    Steal,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Share => "share",
            Decision::Steal => "steal",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "share" => Ok(Decision::Share),
            "steal" => Ok(Decision::Steal),
            _ => Err(()),
        }
    }
}

fn decision_field(decision: Option<Decision>) -> &'static str {
    decision.map_or("", |d| d.as_str())
}

/// Which side of a game a user plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    P1,
    P2,
}

impl Seat {
    pub fn other(self) -> Seat {
        match self {
            Seat::P1 => Seat::P2,
            Seat::P2 => Seat::P1,
        }
    }
}

/// Round outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    None,
    Player1,
    Player2,
    Both,
    House,
}

impl Winner {
    fn as_field(&self) -> &'static str {
        match self {
            Winner::None => "",
            Winner::Player1 => "p1",
            Winner::Player2 => "p2",
            Winner::Both => "p1p2",
            Winner::House => "server",
        }
    }

    fn from_field(s: &str) -> Option<Self> {
        match s {
            "" => Some(Winner::None),
            "p1" => Some(Winner::Player1),
            "p2" => Some(Winner::Player2),
            "p1p2" => Some(Winner::Both),
            "server" => Some(Winner::House),
            _ => None,
        }
    }

    fn seat(seat: Seat) -> Winner {
        match seat {
            Seat::P1 => Winner::Player1,
            Seat::P2 => Winner::Player2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    #[default]
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Completed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Active => "active",
            GameStatus::Completed => "completed",
        }
    }
}

/// 1-based round number, always within 1..=ROUNDS
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoundNumber(usize);

impl RoundNumber {
    pub fn new(n: usize) -> Option<Self> {
        (1..=ROUNDS).contains(&n).then_some(Self(n))
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 - 1
    }

    pub fn all() -> impl Iterator<Item = RoundNumber> {
        (1..=ROUNDS).map(RoundNumber)
    }
}

impl FromStr for RoundNumber {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<usize>().ok().and_then(RoundNumber::new).ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Round {
    pub p1: Option<Decision>,
    pub p2: Option<Decision>,
    pub winner: Option<Winner>,
    pub status: RoundStatus,
    /// Extra coins paid only when both players shared
    pub bonus: i64,
}

impl Round {
    pub fn decision(&self, seat: Seat) -> Option<Decision> {
        match seat {
            Seat::P1 => self.p1,
            Seat::P2 => self.p2,
        }
    }

    fn decision_mut(&mut self, seat: Seat) -> &mut Option<Decision> {
        match seat {
            Seat::P1 => &mut self.p1,
            Seat::P2 => &mut self.p2,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoundStatus::Completed
    }

    pub fn winner(&self) -> Winner {
        self.winner.unwrap_or(Winner::None)
    }

    /// Decide the winner once both decisions are in. Completed rounds are
    /// never touched again. Returns whether this call completed the round.
    pub fn resolve(&mut self, coins: i64) -> bool {
        if self.is_completed() {
            return false;
        }
        let (winner, bonus) = match (self.p1, self.p2) {
            (Some(Decision::Share), Some(Decision::Share)) => (Winner::Both, coins / BONUS_DIVISOR),
            (Some(Decision::Steal), Some(Decision::Steal)) => (Winner::House, 0),
            (Some(Decision::Steal), Some(Decision::Share)) => (Winner::Player1, 0),
            (Some(Decision::Share), Some(Decision::Steal)) => (Winner::Player2, 0),
            _ => return false,
        };
        self.winner = Some(winner);
        self.bonus = bonus;
        self.status = RoundStatus::Completed;
        true
    }

    /// Coins this round pays to `seat`
    pub fn payout(&self, seat: Seat, per_round: i64) -> i64 {
        match self.winner() {
            Winner::Both => {
                let bonus = if self.bonus > 1 { self.bonus / 2 } else { 0 };
                per_round / 2 + bonus
            }
            w if w == Winner::seat(seat) => per_round,
            _ => 0,
        }
    }

    /// Coins of the round share that nobody receives
    pub fn house_take(&self, per_round: i64) -> i64 {
        match self.winner() {
            Winner::House => per_round,
            Winner::Both => per_round - 2 * (per_round / 2),
            _ => 0,
        }
    }
}

/// Store key of a game: `game:p<p1>:p<p2>:<id>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameKey {
    pub p1: UserId,
    pub p2: UserId,
    pub id: GameId,
}

impl GameKey {
    pub fn involves(&self, user: UserId) -> bool {
        self.p1 == user || self.p2 == user
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "game:p{}:p{}:{}", self.p1, self.p2, self.id)
    }
}

impl FromStr for GameKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        if parts.next() != Some("game") {
            return Err(());
        }
        let p1 = parts.next().and_then(|p| p.strip_prefix('p')).ok_or(())?;
        let p2 = parts.next().and_then(|p| p.strip_prefix('p')).ok_or(())?;
        let id = parts.next().ok_or(())?;
        if parts.next().is_some() {
            return Err(());
        }
        Ok(GameKey {
            p1: p1.parse().map_err(|_| ())?,
            p2: p2.parse().map_err(|_| ())?,
            id: id.parse().map_err(|_| ())?,
        })
    }
}

/// Per-player index entry naming one of the player's games.
///
/// Stored under `trust:user<id>:game:<n>` where `n` counts down as game ids
/// grow, so a prefix walk over one player yields their newest game first.
/// Both players get an entry before the game record itself is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRef {
    pub user: UserId,
    pub game: GameKey,
}

impl GameRef {
    /// Entries for both players of `game`
    pub fn for_players(game: &Game) -> [GameRef; 2] {
        let key = game.game_key();
        [
            GameRef { user: game.p1, game: key },
            GameRef { user: game.p2, game: key },
        ]
    }

    pub fn key_for(user: UserId, id: GameId) -> String {
        format!("trust:user{}:game:{:020}", user, GameId::MAX - id)
    }

    pub fn pattern_for(user: UserId) -> String {
        format!("trust:user{}:game:*", user)
    }
}

impl Record for GameRef {
    const KIND: &'static str = "game_ref";
    const SCHEMA_VERSION: u32 = 1;

    fn key(&self) -> String {
        GameRef::key_for(self.user, self.game.id)
    }

    fn encode(&self) -> FieldMap {
        FieldWriter::new::<Self>()
            .put("user_id", self.user)
            .put("game", self.game)
            .finish()
    }

    fn decode(fields: &FieldMap) -> Result<Self, CodecError> {
        let r = FieldReader::new::<Self>(fields)?;
        let raw = r.text("game");
        let game: GameKey = raw.parse().map_err(|_| r.invalid("game", raw))?;
        let user = r.required("user_id")?;
        if !game.involves(user) {
            return Err(r.invalid("user_id", &user.to_string()));
        }
        Ok(Self { user, game })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub id: GameId,
    pub created: i64,
    pub p1: UserId,
    pub p2: UserId,
    pub time_limit_secs: u32,
    pub coins: i64,
    pub status: GameStatus,
    pub max_steal: u32,
    pub rounds: [Round; ROUNDS],
}

impl Game {
    pub fn new(id: GameId, p1: UserId, p2: UserId, config: &GameConfig) -> Self {
        Self {
            id,
            created: chrono::Utc::now().timestamp(),
            p1,
            p2,
            time_limit_secs: config.time_limit_secs,
            coins: config.coins,
            status: GameStatus::Active,
            max_steal: config.max_steal,
            rounds: [Round::default(); ROUNDS],
        }
    }

    pub fn game_key(&self) -> GameKey {
        GameKey {
            p1: self.p1,
            p2: self.p2,
            id: self.id,
        }
    }

    pub fn seat_of(&self, user: UserId) -> Option<Seat> {
        if user == self.p1 {
            Some(Seat::P1)
        } else if user == self.p2 {
            Some(Seat::P2)
        } else {
            None
        }
    }

    pub fn player(&self, seat: Seat) -> UserId {
        match seat {
            Seat::P1 => self.p1,
            Seat::P2 => self.p2,
        }
    }

    pub fn round(&self, number: RoundNumber) -> &Round {
        &self.rounds[number.index()]
    }

    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    pub fn per_round_coins(&self) -> i64 {
        self.coins / ROUNDS as i64
    }

    pub fn steals_by(&self, seat: Seat) -> u32 {
        self.rounds
            .iter()
            .filter(|r| r.decision(seat) == Some(Decision::Steal))
            .count() as u32
    }

    pub fn can_steal(&self, seat: Seat) -> bool {
        self.steals_by(seat) < self.max_steal
    }

    /// Record a decision if this seat may play `number` now: its own slot is
    /// unset and its previous round is decided. Returns whether it was taken.
    pub fn record_decision(&mut self, seat: Seat, number: RoundNumber, decision: Decision) -> bool {
        let i = number.index();
        if self.rounds[i].decision(seat).is_some() {
            return false;
        }
        if i > 0 && self.rounds[i - 1].decision(seat).is_none() {
            return false;
        }
        *self.rounds[i].decision_mut(seat) = Some(decision);
        true
    }

    /// Resolve every pending round that has both decisions.
    /// Returns how many rounds this pass completed.
    pub fn resolve_rounds(&mut self) -> usize {
        let coins = self.coins;
        self.rounds
            .iter_mut()
            .map(|r| r.resolve(coins))
            .filter(|completed| *completed)
            .count()
    }

    pub fn final_round_completed(&self) -> bool {
        self.rounds[ROUNDS - 1].is_completed()
    }

    /// Round this seat plays next, `None` once all four are decided
    pub fn next_round_for(&self, seat: Seat) -> Option<RoundNumber> {
        RoundNumber::all().find(|n| self.round(*n).decision(seat).is_none())
    }
}

/// Stored field names per round: decision p1, decision p2, winner, status, rewards
const ROUND_FIELDS: [[&str; 5]; ROUNDS] = [
    ["r1_p1_decision", "r1_p2_decision", "r1_winner", "r1_status", "r1_rewards"],
    ["r2_p1_decision", "r2_p2_decision", "r2_winner", "r2_status", "r2_rewards"],
    ["r3_p1_decision", "r3_p2_decision", "r3_winner", "r3_status", "r3_rewards"],
    ["r4_p1_decision", "r4_p2_decision", "r4_winner", "r4_status", "r4_rewards"],
];

impl Record for Game {
    const KIND: &'static str = "game";
    const SCHEMA_VERSION: u32 = 1;

    fn key(&self) -> String {
        self.game_key().to_string()
    }

    fn encode(&self) -> FieldMap {
        let mut w = FieldWriter::new::<Self>()
            .put("id", self.id)
            .put("created", self.created)
            .put("p1_id", self.p1)
            .put("p2_id", self.p2)
            .put("rounds", ROUNDS)
            .put("time_limit", self.time_limit_secs)
            .put("coins", self.coins)
            .put("status", self.status.as_str())
            .put("max_steal", self.max_steal);

        for (round, [p1, p2, winner, status, rewards]) in self.rounds.iter().zip(ROUND_FIELDS) {
            w.put_mut(p1, decision_field(round.p1));
            w.put_mut(p2, decision_field(round.p2));
            w.put_mut(winner, round.winner().as_field());
            w.put_mut(
                status,
                match round.status {
                    RoundStatus::Pending => "in_progress",
                    RoundStatus::Completed => "completed",
                },
            );
            w.put_mut(rewards, round.bonus);
        }
        w.finish()
    }

    fn decode(fields: &FieldMap) -> Result<Self, CodecError> {
        let r = FieldReader::new::<Self>(fields)?;

        let rounds_field: usize = r.or("rounds", ROUNDS)?;
        if rounds_field != ROUNDS {
            return Err(r.invalid("rounds", &rounds_field.to_string()));
        }

        let status = match r.text("status") {
            "active" => GameStatus::Active,
            "completed" => GameStatus::Completed,
            other => return Err(r.invalid("status", other)),
        };

        let mut rounds = [Round::default(); ROUNDS];
        for (round, [p1, p2, winner, status, rewards]) in rounds.iter_mut().zip(ROUND_FIELDS) {
            round.p1 = parse_decision(&r, p1)?;
            round.p2 = parse_decision(&r, p2)?;
            round.winner = match Winner::from_field(r.text(winner)) {
                Some(Winner::None) => None,
                Some(w) => Some(w),
                None => return Err(r.invalid(winner, r.text(winner))),
            };
            round.status = match r.text(status) {
                "" | "in_progress" => RoundStatus::Pending,
                "completed" => RoundStatus::Completed,
                other => return Err(r.invalid(status, other)),
            };
            round.bonus = r.or(rewards, 0)?;
        }

        Ok(Self {
            id: r.required("id")?,
            created: r.or("created", 0)?,
            p1: r.required("p1_id")?,
            p2: r.required("p2_id")?,
            time_limit_secs: r.or("time_limit", 0)?,
            coins: r.required("coins")?,
            status,
            max_steal: r.required("max_steal")?,
            rounds,
        })
    }
}

fn parse_decision(r: &FieldReader<'_>, field: &'static str) -> Result<Option<Decision>, CodecError> {
    match r.text(field) {
        "" => Ok(None),
        raw => raw.parse().map(Some).map_err(|_| r.invalid(field, raw)),
    }
}

/// Outcome of one finished game from one player's side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: GameId,
    pub own_payout: i64,
    pub opponent_id: UserId,
    pub opponent_payout: i64,
}

impl fmt::Display for GameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.game_id, self.own_payout, self.opponent_id, self.opponent_payout
        )
    }
}

impl FromStr for GameSummary {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [game_id, own, opponent, opponent_payout] = parts.as_slice() else {
            return Err(());
        };
        Ok(GameSummary {
            game_id: game_id.parse().map_err(|_| ())?,
            own_payout: own.parse().map_err(|_| ())?,
            opponent_id: opponent.parse().map_err(|_| ())?,
            opponent_payout: opponent_payout.parse().map_err(|_| ())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub created: i64,
    pub display_name: String,
    pub balance: i64,
    pub avatar_id: u32,
    pub hour_limit: i64,
    /// Most recent first
    pub history: Vec<GameSummary>,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>, avatar_id: u32, config: &UserConfig) -> Self {
        Self {
            id,
            created: chrono::Utc::now().timestamp(),
            display_name: display_name.into(),
            balance: config.starting_balance,
            avatar_id,
            hour_limit: config.hour_limit,
            history: Vec::new(),
        }
    }

    pub fn key_for(id: UserId) -> String {
        format!("user:{}", id)
    }

    /// Prepend a finished game, keeping at most `cap` entries
    pub fn push_history(&mut self, summary: GameSummary, cap: usize) {
        self.history.insert(0, summary);
        self.history.truncate(cap);
    }
}

impl Record for User {
    const KIND: &'static str = "user";
    const SCHEMA_VERSION: u32 = 1;

    fn key(&self) -> String {
        User::key_for(self.id)
    }

    fn encode(&self) -> FieldMap {
        let history = self
            .history
            .iter()
            .map(GameSummary::to_string)
            .collect::<Vec<_>>()
            .join("|");

        FieldWriter::new::<Self>()
            .put("id", self.id)
            .put("created", self.created)
            .put("display_name", &self.display_name)
            .put("balance", self.balance)
            .put("avatar_id", self.avatar_id)
            .put("hour_limit", self.hour_limit)
            .put("last_games_result", history)
            .finish()
    }

    fn decode(fields: &FieldMap) -> Result<Self, CodecError> {
        let r = FieldReader::new::<Self>(fields)?;

        let raw_history = r.text("last_games_result");
        let mut history = raw_history
            .split('|')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<GameSummary>().map_err(|_| r.invalid("last_games_result", s)))
            .collect::<Result<Vec<_>, _>>()?;
        // Version 0 records appended oldest first
        if r.version() == 0 {
            history.reverse();
        }

        Ok(Self {
            id: r.required("id")?,
            created: r.or("created", 0)?,
            display_name: r.text("display_name").to_string(),
            balance: r.required("balance")?,
            avatar_id: r.or("avatar_id", 1)?,
            hour_limit: r.or("hour_limit", 0)?,
            history,
        })
    }
}
