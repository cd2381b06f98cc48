//! Traits a robot strategy implements to be played by the harness.
//!
//! A [`Strategy`] is the compiled decision logic of a robot. Every game the robot takes part in
//! gets its own [`MoveProcess`], spawned from the strategy, which keeps whatever state the
//! strategy needs between turns (round counters, grudges, ...).
//!
//! A process is driven turn by turn through [`MoveProcess::advance`]: it receives the opponent's
//! previous move (`None` on the first turn) and answers with a [`MoveOutcome`]. Strategies that
//! need to "think" return [`MoveOutcome::Pending`] with a future resolving to the move.

use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// One action of one round.
///
/// The game only knows [`Move::Cooperate`] and [`Move::Defect`]. Anything else a strategy
/// produces (or the server reports) is kept verbatim in [`Move::Other`] so it can still be sent
/// on the wire: the server is the authority on what an invalid move costs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Move {
    /// `COOPERATE`
    Cooperate,
    /// `DEFECT`
    Defect,
    /// Any value outside the two-symbol alphabet.
    Other(String),
}

impl Move {
    /// True for [`Move::Cooperate`] and [`Move::Defect`].
    pub fn is_valid(&self) -> bool {
        !matches!(self, Move::Other(_))
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Move::Cooperate => "COOPERATE",
            Move::Defect => "DEFECT",
            Move::Other(s) => s,
        }
    }
}

impl Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Move {
    fn from(value: &str) -> Self {
        match value {
            "COOPERATE" => Move::Cooperate,
            "DEFECT" => Move::Defect,
            other => Move::Other(other.to_owned()),
        }
    }
}

impl From<String> for Move {
    fn from(value: String) -> Self {
        match value.as_str() {
            "COOPERATE" => Move::Cooperate,
            "DEFECT" => Move::Defect,
            _ => Move::Other(value),
        }
    }
}

impl From<Move> for String {
    fn from(value: Move) -> Self {
        match value {
            Move::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

/// A move that is not known yet.
pub type PendingMove = BoxFuture<'static, Move>;

/// What a [`MoveProcess`] answers for one turn.
pub enum MoveOutcome {
    /// The move is known right away.
    Immediate(Move),
    /// The move will be known once the future settles.
    Pending(PendingMove),
}

impl MoveOutcome {
    /// Wraps a future into [`MoveOutcome::Pending`].
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Move> + Send + 'static,
    {
        MoveOutcome::Pending(Box::pin(future))
    }
}

impl Debug for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveOutcome::Immediate(m) => f.debug_tuple("Immediate").field(m).finish(),
            MoveOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl From<Move> for MoveOutcome {
    fn from(value: Move) -> Self {
        MoveOutcome::Immediate(value)
    }
}

/// One strategy instance playing one game.
pub trait MoveProcess: Send {
    /// Computes the next move.
    ///
    /// `opponent_previous` is `None` on the first turn of a game. Returning `None` means the
    /// process has finished: doing so while the game is still running is a bug in the strategy
    /// and is reported as a [`StrategyFault`](crate::error::StrategyFault).
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome>;
}

impl<F> MoveProcess for F
where
    F: FnMut(Option<Move>) -> Option<MoveOutcome> + Send,
{
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        self(opponent_previous)
    }
}

/// The decision logic of a robot. Spawns one independent [`MoveProcess`] per game.
pub trait Strategy: Send + Sync {
    /// Starts a fresh process for a new game.
    fn spawn(&self) -> Box<dyn MoveProcess>;
}

/// A strategy built from a closure returning fresh processes. See [`from_fn`].
pub struct FnStrategy<F>(F);

impl<F> Strategy for FnStrategy<F>
where
    F: Fn() -> Box<dyn MoveProcess> + Send + Sync,
{
    fn spawn(&self) -> Box<dyn MoveProcess> {
        (self.0)()
    }
}

/// Builds a shareable [`Strategy`] out of a process factory.
///
/// ```
/// use robot_harness::game_interface::{from_fn, Move, MoveOutcome, Strategy};
///
/// let always_defect = from_fn(|| Box::new(|_prev: Option<Move>| Some(MoveOutcome::from(Move::Defect))));
/// let mut process = always_defect.spawn();
/// assert!(matches!(process.advance(None), Some(MoveOutcome::Immediate(Move::Defect))));
/// ```
pub fn from_fn<F>(factory: F) -> Arc<dyn Strategy>
where
    F: Fn() -> Box<dyn MoveProcess> + Send + Sync + 'static,
{
    Arc::new(FnStrategy(factory))
}
