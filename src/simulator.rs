//! Local reference implementation of the iterated game.
//!
//! Used as an oracle: a game played through the server between two well-behaved strategies
//! must end with exactly the score [`simulate`] computes. Unlike the server, the simulator never
//! forfeits a game, so a strategy that stops early or plays an invalid move is an error here.
//! [`expected_forfeit`] gives the score the server is expected to report when it does forfeit.

use tracing::{debug, instrument};

use crate::error::{SimulationError, StrategyFault};
use crate::game_interface::{Move, MoveOutcome, MoveProcess, Strategy};

/// Points earned by a player who moved while the other one did not, in a forfeited round.
pub const FORFEIT_PAYOUT: u32 = 5;

/// Points of `(a, b)` for one round. `None` if either move is invalid.
///
/// | a \ b     | COOPERATE | DEFECT |
/// |-----------|-----------|--------|
/// | COOPERATE | (3,3)     | (0,5)  |
/// | DEFECT    | (5,0)     | (1,1)  |
pub fn payout(a: &Move, b: &Move) -> Option<(u32, u32)> {
    match (a, b) {
        (Move::Cooperate, Move::Cooperate) => Some((3, 3)),
        (Move::Cooperate, Move::Defect) => Some((0, 5)),
        (Move::Defect, Move::Cooperate) => Some((5, 0)),
        (Move::Defect, Move::Defect) => Some((1, 1)),
        _ => None,
    }
}

/// One of the two players of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

/// Runs one turn of `process`, waiting for the move if it is pending.
async fn next_move(
    process: &mut dyn MoveProcess,
    previous: Option<Move>,
    player: usize,
    turn: u32,
) -> Result<Move, SimulationError> {
    match process.advance(previous) {
        None => Err(SimulationError::Fault {
            player,
            fault: StrategyFault::Terminated { turn },
        }),
        Some(MoveOutcome::Immediate(value)) => Ok(value),
        Some(MoveOutcome::Pending(future)) => Ok(future.await),
    }
}

/// Points of one simulated round; an invalid move is charged to the first player who made it.
fn score_round(ma: Move, mb: Move, turn: u32) -> Result<(u32, u32), SimulationError> {
    if let Some(points) = payout(&ma, &mb) {
        return Ok(points);
    }
    let (player, value) = if ma.is_valid() { (2, mb) } else { (1, ma) };
    Err(SimulationError::Fault {
        player,
        fault: StrategyFault::InvalidMove { turn, value },
    })
}

fn add(scores: (u32, u32), points: (u32, u32), rounds: u32) -> Result<(u32, u32), SimulationError> {
    match (scores.0.checked_add(points.0), scores.1.checked_add(points.1)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(SimulationError::ScoreOverflow { rounds }),
    }
}

async fn play(a: &dyn Strategy, b: &dyn Strategy, rounds: u32) -> Result<(u32, u32), SimulationError> {
    let mut first = a.spawn();
    let mut second = b.spawn();
    let mut previous: Option<(Move, Move)> = None;
    let mut scores = (0, 0);

    for turn in 1..=rounds {
        let (last_a, last_b) = match previous.take() {
            Some((ma, mb)) => (Some(ma), Some(mb)),
            None => (None, None),
        };
        // each player sees the other's previous move
        let ma = next_move(first.as_mut(), last_b, 1, turn).await?;
        let mb = next_move(second.as_mut(), last_a, 2, turn).await?;
        let points = score_round(ma.clone(), mb.clone(), turn)?;
        scores = add(scores, points, rounds)?;
        previous = Some((ma, mb));
    }
    Ok(scores)
}

/// Plays `rounds` rounds between fresh processes of `a` and `b`.
#[instrument(skip(a, b))]
pub async fn simulate(
    a: &dyn Strategy,
    b: &dyn Strategy,
    rounds: u32,
) -> Result<(u32, u32), SimulationError> {
    let scores = play(a, b, rounds).await?;
    debug!(?scores, "simulated");
    Ok(scores)
}

/// Score of a game the server forfeits on `violation_round` (1-based) because of `offender`.
///
/// The rounds before the violation are played normally. From the violation round on, the other
/// player earns [`FORFEIT_PAYOUT`] per round and the offender nothing.
#[instrument(skip(a, b))]
pub async fn expected_forfeit(
    a: &dyn Strategy,
    b: &dyn Strategy,
    rounds: u32,
    violation_round: u32,
    offender: Side,
) -> Result<(u32, u32), SimulationError> {
    if violation_round == 0 || violation_round > rounds {
        return Err(SimulationError::RoundOutOfRange {
            round: violation_round,
            rounds,
        });
    }
    let played = play(a, b, violation_round - 1).await?;
    let forfeited = (rounds - violation_round + 1)
        .checked_mul(FORFEIT_PAYOUT)
        .ok_or(SimulationError::ScoreOverflow { rounds })?;
    let scores = match offender {
        Side::First => add(played, (0, forfeited), rounds)?,
        Side::Second => add(played, (forfeited, 0), rounds)?,
    };
    debug!(?scores, "expected forfeit");
    Ok(scores)
}
