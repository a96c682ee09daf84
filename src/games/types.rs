use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Surrogate key assigned by the session store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported game variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameVariant {
    Coin,
    Chest,
    Cracker,
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameVariant::Coin => write!(f, "coin"),
            GameVariant::Chest => write!(f, "chest"),
            GameVariant::Cracker => write!(f, "cracker"),
        }
    }
}

/// Session lifecycle. `Finished` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Finished,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Open)
    }

    /// Only `Open -> Finished` and `Open -> Cancelled` exist
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        self == SessionStatus::Open && next.is_terminal()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Finished => write!(f, "finished"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Coin side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn from_bool(heads: bool) -> Self {
        if heads {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

/// The six fixed cracker slots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CrackerSlot {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
}

impl CrackerSlot {
    pub const ALL: [CrackerSlot; 6] = [
        CrackerSlot::Red,
        CrackerSlot::Orange,
        CrackerSlot::Yellow,
        CrackerSlot::Green,
        CrackerSlot::Blue,
        CrackerSlot::Purple,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|slot| slot.to_string().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for CrackerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrackerSlot::Red => "red",
            CrackerSlot::Orange => "orange",
            CrackerSlot::Yellow => "yellow",
            CrackerSlot::Green => "green",
            CrackerSlot::Blue => "blue",
            CrackerSlot::Purple => "purple",
        };
        write!(f, "{}", name)
    }
}

/// A chest item picked into the prize pool, with its value at pick time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChestPick {
    pub item_id: String,
    pub value: u64,
}

/// Variant-specific player selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum Selection {
    Coin { side: CoinSide },
    Chest { items: Vec<ChestPick> },
    Cracker { slots: BTreeSet<CrackerSlot> },
}

impl Selection {
    pub fn variant(&self) -> GameVariant {
        match self {
            Selection::Coin { .. } => GameVariant::Coin,
            Selection::Chest { .. } => GameVariant::Chest,
            Selection::Cracker { .. } => GameVariant::Cracker,
        }
    }

    /// Total value of the chest items at stake; zero for other variants
    pub fn pool_value(&self) -> u64 {
        match self {
            Selection::Chest { items } => items
                .iter()
                .fold(0u64, |acc, item| acc.saturating_add(item.value)),
            _ => 0,
        }
    }
}

/// What the random source produced when the session was resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Draw {
    Coin { side: CoinSide },
    Chest { roll: f64, win_chance: f64 },
    Cracker { slot: CrackerSlot },
}

/// Settled result; `payout` is zero whenever `won` is false
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub draw: Draw,
    pub won: bool,
    pub payout: u64,
}

impl Outcome {
    pub fn new(draw: Draw, won: bool, payout: u64) -> Self {
        Self {
            draw,
            won,
            payout: if won { payout } else { 0 },
        }
    }
}

/// Caller-supplied context carried on the session and its events
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionContext {
    /// Where the outcome should be announced (chat channel, webhook route, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// External correlation id, e.g. the interaction that started the game
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Request to open a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_key: String,
    pub variant: GameVariant,
    pub bet_amount: u64,
    pub context: SessionContext,
}

/// One play attempt. Terminal records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSession {
    pub id: SessionId,
    pub owner_key: String,
    pub variant: GameVariant,
    pub bet_amount: u64,
    pub selection: Option<Selection>,
    pub status: SessionStatus,
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameSession {
    pub fn open(id: SessionId, request: NewSession, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_key: request.owner_key,
            variant: request.variant,
            bet_amount: request.bet_amount,
            selection: None,
            status: SessionStatus::Open,
            outcome: None,
            context: request.context,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a terminal transition in place. Callers have already checked the
    /// expected status.
    pub(crate) fn settle(&mut self, status: SessionStatus, outcome: Option<Outcome>, now: DateTime<Utc>) {
        self.status = status;
        self.outcome = outcome;
        self.updated_at = now;
    }

    pub(crate) fn select(&mut self, selection: Selection, now: DateTime<Utc>) {
        self.selection = Some(selection);
        self.updated_at = now;
    }
}

/// Result of a store-level selection write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionUpdate {
    Applied,
    NotOpen(SessionStatus),
    Missing,
}

/// Result of `Resolve`
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// This call performed the terminal transition
    Settled(Outcome),
    /// Another caller got there first; nothing was credited
    AlreadySettled(SessionStatus),
}

/// Result of `Cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    Cancelled { refunded: u64 },
    AlreadySettled(SessionStatus),
}
