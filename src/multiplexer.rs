//! Per-connection dispatcher answering the server's move requests.
//!
//! Every game a robot plays is a session, identified by the server. The [`SessionMultiplexer`]
//! keeps one [`MoveProcess`] per active session and moves each session through
//! `absent → active → absent`:
//!
//! - `game:init` for an absent session spawns a process and sends its first move,
//! - `game:next` for an active session advances that process with the opponent's last move,
//! - `game:over` drops the process.
//!
//! Anything else (a continue or end for an absent session, a second start for an active one) is
//! a [`ProtocolViolation`] and ends the connection.
//!
//! All sessions of one connection are handled by a single task. A process answering
//! [`MoveOutcome::Pending`] suspends only its own session: further events for it are queued and
//! replayed in order once the move is sent, while other sessions keep being served.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::agent::Agent;
use crate::configuration::InvalidMovePolicy;
use crate::correlator::MatchCorrelator;
use crate::error::{HarnessError, ProtocolViolation, StrategyFault};
use crate::game_interface::{Move, MoveOutcome, MoveProcess};
use crate::protocol::{ClientEvent, ServerEvent, SessionId};
use crate::transport::ClientSink;

/// Events queued for a suspended session.
#[derive(Debug)]
enum SessionInput {
    Continue(Move),
    End,
}

struct SessionSlot {
    process: Box<dyn MoveProcess>,
    turn: u32,
    suspended: bool,
    backlog: VecDeque<SessionInput>,
}

/// Maps the sessions of one connection to their move processes.
pub struct SessionMultiplexer {
    agent: Arc<Agent>,
    sink: ClientSink,
    policy: InvalidMovePolicy,
    sessions: HashMap<SessionId, SessionSlot>,
    in_flight: FuturesUnordered<BoxFuture<'static, (SessionId, Move)>>,
}

impl SessionMultiplexer {
    pub fn new(agent: Arc<Agent>, sink: ClientSink, policy: InvalidMovePolicy) -> Self {
        SessionMultiplexer {
            agent,
            sink,
            policy,
            sessions: HashMap::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Number of sessions currently active.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// True if `session` is waiting for a pending move.
    pub fn is_suspended(&self, session: &SessionId) -> bool {
        self.sessions.get(session).is_some_and(|s| s.suspended)
    }

    /// Handles a session event.
    ///
    /// Events that are not about sessions are given back untouched so the caller can route them
    /// elsewhere.
    pub fn dispatch(&mut self, event: ServerEvent) -> Result<Option<ServerEvent>, HarnessError> {
        match event {
            ServerEvent::SessionStart { session } => self.on_start(session)?,
            ServerEvent::SessionContinue { session, previous } => {
                self.on_continue(session, previous)?
            }
            ServerEvent::SessionEnd { session } => self.on_end(session)?,
            other => return Ok(Some(other)),
        }
        Ok(None)
    }

    fn on_start(&mut self, session: SessionId) -> Result<(), HarnessError> {
        if self.sessions.contains_key(&session) {
            return Err(ProtocolViolation::DuplicateSession(session).into());
        }
        debug!(agent = %self.agent.name, %session, "game:init");
        self.sessions.insert(
            session.clone(),
            SessionSlot {
                process: self.agent.strategy.spawn(),
                turn: 0,
                suspended: false,
                backlog: VecDeque::new(),
            },
        );
        self.advance(&session, None)
    }

    fn on_continue(&mut self, session: SessionId, previous: Move) -> Result<(), HarnessError> {
        let Some(slot) = self.sessions.get_mut(&session) else {
            return Err(ProtocolViolation::UnknownSession(session).into());
        };
        if slot.suspended {
            trace!(%session, "queued game:next while thinking");
            slot.backlog.push_back(SessionInput::Continue(previous));
            return Ok(());
        }
        self.advance(&session, Some(previous))
    }

    fn on_end(&mut self, session: SessionId) -> Result<(), HarnessError> {
        let Some(slot) = self.sessions.get_mut(&session) else {
            return Err(ProtocolViolation::UnknownSession(session).into());
        };
        if slot.suspended {
            trace!(%session, "queued game:over while thinking");
            slot.backlog.push_back(SessionInput::End);
            return Ok(());
        }
        self.sessions.remove(&session);
        debug!(agent = %self.agent.name, %session, "game:over");
        Ok(())
    }

    /// Runs one turn of `session`'s process.
    fn advance(&mut self, session: &SessionId, previous: Option<Move>) -> Result<(), HarnessError> {
        let Some(slot) = self.sessions.get_mut(session) else {
            return Err(ProtocolViolation::UnknownSession(session.clone()).into());
        };
        slot.turn += 1;
        let turn = slot.turn;
        match slot.process.advance(previous) {
            None => Err(self.fault(session, StrategyFault::Terminated { turn })),
            Some(MoveOutcome::Immediate(value)) => self.transmit(session, turn, value),
            Some(MoveOutcome::Pending(future)) => {
                slot.suspended = true;
                let id = session.clone();
                self.in_flight
                    .push(Box::pin(async move { (id, future.await) }));
                Ok(())
            }
        }
    }

    /// Sends a settled pending move, then replays what was queued meanwhile.
    fn on_settled(&mut self, session: SessionId, value: Move) -> Result<(), HarnessError> {
        let Some(slot) = self.sessions.get_mut(&session) else {
            return Err(ProtocolViolation::UnknownSession(session).into());
        };
        slot.suspended = false;
        let turn = slot.turn;
        self.transmit(&session, turn, value)?;

        while let Some(slot) = self.sessions.get_mut(&session) {
            if slot.suspended {
                break;
            }
            match slot.backlog.pop_front() {
                None => break,
                Some(SessionInput::Continue(previous)) => self.advance(&session, Some(previous))?,
                Some(SessionInput::End) => {
                    let leftover = !slot.backlog.is_empty();
                    self.sessions.remove(&session);
                    debug!(agent = %self.agent.name, %session, "game:over");
                    if leftover {
                        return Err(ProtocolViolation::UnknownSession(session).into());
                    }
                }
            }
        }
        Ok(())
    }

    fn transmit(&self, session: &SessionId, turn: u32, value: Move) -> Result<(), HarnessError> {
        if !value.is_valid() {
            match self.policy {
                InvalidMovePolicy::Forward => warn!(
                    agent = %self.agent.name,
                    %session,
                    turn,
                    "yielded an invalid move '{value}', forwarding it anyway"
                ),
                InvalidMovePolicy::Abort => {
                    return Err(self.fault(session, StrategyFault::InvalidMove { turn, value }))
                }
            }
        }
        self.sink.send(ClientEvent::Move {
            session: session.clone(),
            value,
        })
    }

    fn fault(&self, session: &SessionId, fault: StrategyFault) -> HarnessError {
        HarnessError::Strategy {
            agent: self.agent.name.clone(),
            session: session.clone(),
            fault,
        }
    }

    /// Waits for the next pending move, sends it and replays the events queued for its session.
    ///
    /// Returns false if no session is suspended.
    pub async fn settle_next(&mut self) -> Result<bool, HarnessError> {
        let Some((session, value)) = self.in_flight.next().await else {
            return Ok(false);
        };
        self.on_settled(session, value)?;
        Ok(true)
    }

    /// Serves the connection until the server closes it.
    ///
    /// Session events are handled here; notifications about matches and tournaments go to
    /// `correlator`. Returns an error on the first strategy fault or protocol violation.
    #[instrument(skip_all, fields(agent = %self.agent.name, connection = %self.sink.id()))]
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<ServerEvent>,
        correlator: MatchCorrelator,
    ) -> Result<(), HarnessError> {
        loop {
            tokio::select! {
                Some((session, value)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_settled(session, value)?;
                }
                event = inbound.recv() => {
                    let Some(event) = event else {
                        info!(active = self.sessions.len(), "connection closed");
                        return Ok(());
                    };
                    trace!("< {event:?}");
                    match self.dispatch(event)? {
                        None => {}
                        Some(ServerEvent::LoginAck { .. }) => {
                            return Err(ProtocolViolation::DuplicateLogin.into());
                        }
                        Some(notification) => correlator.observe(notification)?,
                    }
                }
            }
        }
    }
}
