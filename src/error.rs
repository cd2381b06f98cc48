//! Errors raised by the harness.
//!
//! Nothing here is ever retried. A [`StrategyFault`] or a [`ProtocolViolation`] ends the
//! connection it happened on, since either the robot or the server can no longer be trusted to
//! agree on the state of that connection.

use thiserror::Error;

use crate::game_interface::Move;
use crate::protocol::{RemoteId, RequestTag, SessionId};

/// A bug in a strategy implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyFault {
    /// The process returned while its game was still running.
    #[error("returned instead of producing a move on turn {turn}")]
    Terminated { turn: u32 },
    /// The process produced a value outside the two-symbol alphabet.
    #[error("produced the invalid move '{value}' on turn {turn}")]
    InvalidMove { turn: u32, value: Move },
}

/// The server sent something that contradicts what this connection knows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("session {0} was started twice")]
    DuplicateSession(SessionId),
    #[error("session {0} is not active")]
    UnknownSession(SessionId),
    #[error("no pending game for request {tag} between {players:?}")]
    UnexpectedMatch {
        tag: RequestTag,
        players: (RemoteId, RemoteId),
    },
    #[error("game {0} was not started by any pending request")]
    UnknownGame(SessionId),
    #[error("game {0} already ended")]
    GameAlreadyEnded(SessionId),
    #[error("no pending tournament for request {0}")]
    UnknownTournament(RequestTag),
    #[error("login acknowledged twice")]
    DuplicateLogin,
}

/// Errors surfaced by the harness runtime.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("robot '{agent}' in session {session}: {fault}")]
    Strategy {
        agent: String,
        session: SessionId,
        fault: StrategyFault,
    },
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("no robot named '{0}'")]
    UnknownAgent(String),
    #[error("robot '{0}' is not logged in")]
    NotLoggedIn(String),
    #[error("connection closed")]
    Disconnected,
    /// The correlator gave up on a pending game or tournament after a protocol violation.
    #[error("pending request {0} was abandoned")]
    Abandoned(RequestTag),
}

/// Local simulation failures. The simulator has no forfeiture, every fault is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("player {player} {fault}")]
    Fault { player: usize, fault: StrategyFault },
    #[error("violation round {round} is outside of a {rounds} rounds game")]
    RoundOutOfRange { round: u32, rounds: u32 },
    #[error("scores of a {rounds} rounds game do not fit in 32 bits")]
    ScoreOverflow { rounds: u32 },
}
