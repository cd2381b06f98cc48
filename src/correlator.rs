//! Matching outbound game requests with the notifications they cause.
//!
//! A `play:now` request may start any number of games at once, and the server reports each of
//! them later with an `observe:init` / `observe:over` pair, in no particular order and
//! interleaved with everything else on the connection. The [`MatchCorrelator`] keeps one
//! pending slot per expected game, keyed by the request tag and the (unordered) pair of players,
//! and registers every slot *before* the request leaves the client so no notification can
//! arrive for a game it does not know about yet.
//!
//! Tournaments go through the same slots, one per pair of participants, but only the terminal
//! `tournament:done` resolves the caller's future.
//!
//! The correlator is shared by every connection of a harness: whichever connection receives a
//! notification hands it to [`MatchCorrelator::observe`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, info, instrument, trace, warn};

use crate::agent::Agent;
use crate::error::{HarnessError, ProtocolViolation};
use crate::protocol::{ClientEvent, RemoteId, RequestTag, ServerEvent, SessionId};

/// Two players, order-normalised so `(a, b)` and `(b, a)` are the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayerPair(RemoteId, RemoteId);

impl PlayerPair {
    pub fn new(a: &RemoteId, b: &RemoteId) -> PlayerPair {
        if a <= b {
            PlayerPair(a.clone(), b.clone())
        } else {
            PlayerPair(b.clone(), a.clone())
        }
    }
}

/// Identifies the request slot(s) a started game belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub tag: RequestTag,
    pub pair: PlayerPair,
}

impl CorrelationKey {
    pub fn new(tag: RequestTag, a: &RemoteId, b: &RemoteId) -> CorrelationKey {
        CorrelationKey {
            tag,
            pair: PlayerPair::new(a, b),
        }
    }
}

impl Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.tag, self.pair.0, self.pair.1)
    }
}

/// Final outcome of one game.
///
/// `players` and `scores` are in request orientation: for a match request the initiator comes
/// first, for a tournament game the participant listed first in the request does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResult {
    pub session: SessionId,
    pub players: (RemoteId, RemoteId),
    pub scores: (u32, u32),
}

impl GameResult {
    /// Score of `player`, if it took part in the game.
    pub fn score_of(&self, player: &RemoteId) -> Option<u32> {
        if *player == self.players.0 {
            Some(self.scores.0)
        } else if *player == self.players.1 {
            Some(self.scores.1)
        } else {
            None
        }
    }
}

/// A game requested through [`MatchCorrelator::request_matches`] that has not finished yet.
#[derive(Debug)]
pub struct PendingGame {
    tag: RequestTag,
    opponent: RemoteId,
    rx: oneshot::Receiver<GameResult>,
}

impl PendingGame {
    pub fn tag(&self) -> RequestTag {
        self.tag
    }

    pub fn opponent(&self) -> &RemoteId {
        &self.opponent
    }

    /// Waits for the game to end.
    ///
    /// Fails with [`HarnessError::Abandoned`] if the correlator gave up on the request.
    pub async fn result(self) -> Result<GameResult, HarnessError> {
        self.rx.await.map_err(|_| HarnessError::Abandoned(self.tag))
    }
}

/// A tournament that has not reported its aggregate yet.
#[derive(Debug)]
pub struct PendingTournament {
    tag: RequestTag,
    rx: oneshot::Receiver<Vec<(RemoteId, u32)>>,
}

impl PendingTournament {
    pub fn tag(&self) -> RequestTag {
        self.tag
    }

    /// Waits for `tournament:done` and returns the score of every participant.
    pub async fn result(self) -> Result<Vec<(RemoteId, u32)>, HarnessError> {
        self.rx.await.map_err(|_| HarnessError::Abandoned(self.tag))
    }
}

/// One expected game.
#[derive(Debug)]
struct Slot {
    /// Player reported first in the result.
    first: RemoteId,
    /// `None` for tournament games, whose results are not surfaced.
    done: Option<oneshot::Sender<GameResult>>,
}

#[derive(Debug)]
struct Running {
    key: CorrelationKey,
    players: (RemoteId, RemoteId),
    slot: Slot,
}

#[derive(Debug)]
struct Tournament {
    games: usize,
    finished: usize,
    done: oneshot::Sender<Vec<(RemoteId, u32)>>,
}

#[derive(Debug, Default)]
struct State {
    /// Slots whose game has not started, oldest first.
    waiting: HashMap<CorrelationKey, VecDeque<Slot>>,
    running: HashMap<SessionId, Running>,
    /// Ended games, kept per request until the request has nothing outstanding.
    ended: HashMap<RequestTag, HashSet<SessionId>>,
    tournaments: HashMap<RequestTag, Tournament>,
}

impl State {
    fn register(&mut self, key: CorrelationKey, slot: Slot) {
        self.waiting.entry(key).or_default().push_back(slot);
    }

    /// Drops every slot of `tag`; their callers observe an abandoned request.
    fn cancel(&mut self, tag: RequestTag) {
        self.waiting.retain(|key, _| key.tag != tag);
        self.running.retain(|_, running| running.key.tag != tag);
        self.tournaments.remove(&tag);
        self.ended.remove(&tag);
    }

    fn has_ended(&self, session: &SessionId) -> bool {
        self.ended.values().any(|sessions| sessions.contains(session))
    }

    /// Forgets the ended games of `tag` once nothing of it is outstanding.
    fn retire(&mut self, tag: RequestTag) {
        let busy = self.tournaments.contains_key(&tag)
            || self.waiting.keys().any(|key| key.tag == tag)
            || self.running.values().any(|running| running.key.tag == tag);
        if !busy {
            if let Some(sessions) = self.ended.remove(&tag) {
                trace!(%tag, games = sessions.len(), "request settled");
            }
        }
    }

    fn abandon_all(&mut self) {
        let games = self.waiting.values().map(VecDeque::len).sum::<usize>() + self.running.len();
        warn!(
            games,
            tournaments = self.tournaments.len(),
            "abandoning every pending request"
        );
        self.waiting.clear();
        self.running.clear();
        self.tournaments.clear();
        self.ended.clear();
    }

    fn apply(&mut self, event: ServerEvent) -> Result<(), ProtocolViolation> {
        match event {
            ServerEvent::MatchStarted {
                tag,
                players,
                session,
            } => {
                if self.running.contains_key(&session) || self.has_ended(&session) {
                    return Err(ProtocolViolation::DuplicateSession(session));
                }
                let key = CorrelationKey::new(tag, &players.0, &players.1);
                let Some(queue) = self.waiting.get_mut(&key) else {
                    return Err(ProtocolViolation::UnexpectedMatch { tag, players });
                };
                let Some(slot) = queue.pop_front() else {
                    return Err(ProtocolViolation::UnexpectedMatch { tag, players });
                };
                if queue.is_empty() {
                    self.waiting.remove(&key);
                }
                debug!(%session, %key, "game started");
                self.running.insert(session, Running { key, players, slot });
            }
            ServerEvent::MatchProgress {
                session,
                moves,
                scores,
            } => {
                trace!(%session, "{} / {} -> {:?}", moves.0, moves.1, scores);
            }
            ServerEvent::MatchEnded { session, scores } => {
                if self.has_ended(&session) {
                    return Err(ProtocolViolation::GameAlreadyEnded(session));
                }
                let Some(Running { key, players, slot }) = self.running.remove(&session) else {
                    return Err(ProtocolViolation::UnknownGame(session));
                };
                self.ended
                    .entry(key.tag)
                    .or_default()
                    .insert(session.clone());

                let result = if slot.first == players.0 {
                    GameResult {
                        session,
                        players,
                        scores,
                    }
                } else {
                    GameResult {
                        session,
                        players: (players.1, players.0),
                        scores: (scores.1, scores.0),
                    }
                };
                debug!(session = %result.session, %key, scores = ?result.scores, "game ended");
                match slot.done {
                    // the caller may have dropped its PendingGame, nothing to do then
                    Some(done) => {
                        let _ = done.send(result);
                    }
                    None => {
                        if let Some(tournament) = self.tournaments.get_mut(&key.tag) {
                            tournament.finished += 1;
                            trace!(
                                tag = %key.tag,
                                "{}/{} tournament games ended",
                                tournament.finished,
                                tournament.games
                            );
                        }
                    }
                }
                self.retire(key.tag);
            }
            ServerEvent::TournamentStarted { tag } => {
                if !self.tournaments.contains_key(&tag) {
                    return Err(ProtocolViolation::UnknownTournament(tag));
                }
                info!(%tag, "tournament started");
            }
            ServerEvent::TournamentDone { tag, scores } => {
                let Some(tournament) = self.tournaments.remove(&tag) else {
                    return Err(ProtocolViolation::UnknownTournament(tag));
                };
                info!(
                    %tag,
                    "tournament done after {}/{} games",
                    tournament.finished,
                    tournament.games
                );
                let _ = tournament.done.send(scores);
                self.retire(tag);
            }
            other => debug!("ignoring {} event", other.name()),
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    next_tag: AtomicU64,
}

/// Shared correlation state of one harness. Cloning gives another handle to the same state.
#[derive(Debug, Clone)]
pub struct MatchCorrelator {
    inner: Arc<Inner>,
}

impl Default for MatchCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchCorrelator {
    pub fn new() -> MatchCorrelator {
        MatchCorrelator {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                next_tag: AtomicU64::new(1),
            }),
        }
    }

    /// A tag never handed out before by this correlator.
    pub fn next_tag(&self) -> RequestTag {
        RequestTag(self.inner.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("poisoned")
    }

    /// Asks the server to start one game between `initiator` and each of `opponents`.
    ///
    /// Returns one [`PendingGame`] per opponent, in the same order. The same opponent may be
    /// listed several times; each listing is a separate game.
    #[instrument(skip_all, fields(initiator = %initiator.name))]
    pub fn request_matches(
        &self,
        initiator: &Agent,
        opponents: &[Arc<Agent>],
    ) -> Result<Vec<PendingGame>, HarnessError> {
        let sink = initiator.sink()?;
        let me = initiator.require_remote_id()?.clone();
        let ids = opponents
            .iter()
            .map(|o| o.require_remote_id().cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let tag = self.next_tag();
        let mut pending = Vec::with_capacity(ids.len());
        {
            let mut state = self.state();
            for id in &ids {
                let (tx, rx) = oneshot::channel();
                state.register(
                    CorrelationKey::new(tag, &me, id),
                    Slot {
                        first: me.clone(),
                        done: Some(tx),
                    },
                );
                pending.push(PendingGame {
                    tag,
                    opponent: id.clone(),
                    rx,
                });
            }
        }

        info!(%tag, games = ids.len(), "play:now");
        let sent = sink.send(ClientEvent::MatchRequest {
            opponents: ids,
            tag,
        });
        if let Err(e) = sent {
            self.state().cancel(tag);
            return Err(e);
        }
        Ok(pending)
    }

    /// Asks the server for a round-robin between `participants`, sent on `requester`'s
    /// connection.
    #[instrument(skip_all, fields(requester = %requester.name, players = participants.len()))]
    pub fn request_tournament(
        &self,
        requester: &Agent,
        participants: &[Arc<Agent>],
    ) -> Result<PendingTournament, HarnessError> {
        let sink = requester.sink()?;
        let ids = participants
            .iter()
            .map(|p| p.require_remote_id().cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let tag = self.next_tag();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            let mut games = 0;
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    state.register(
                        CorrelationKey::new(tag, a, b),
                        Slot {
                            first: a.clone(),
                            done: None,
                        },
                    );
                    games += 1;
                }
            }
            state.tournaments.insert(
                tag,
                Tournament {
                    games,
                    finished: 0,
                    done: tx,
                },
            );
        }

        info!(%tag, "tournament:start");
        let sent = sink.send(ClientEvent::TournamentRequest { players: ids, tag });
        if let Err(e) = sent {
            self.state().cancel(tag);
            return Err(e);
        }
        Ok(PendingTournament { tag, rx })
    }

    /// Feeds a notification from any connection.
    ///
    /// On a violation every pending game and tournament is abandoned before the error is
    /// returned.
    pub fn observe(&self, event: ServerEvent) -> Result<(), ProtocolViolation> {
        let mut state = self.state();
        let result = state.apply(event);
        if let Err(violation) = &result {
            warn!("{violation}");
            state.abandon_all();
        }
        result
    }

    /// Number of games of `tag` that have not ended yet.
    pub fn outstanding(&self, tag: RequestTag) -> usize {
        let state = self.state();
        let waiting = state
            .waiting
            .iter()
            .filter(|(key, _)| key.tag == tag)
            .map(|(_, queue)| queue.len())
            .sum::<usize>();
        waiting + state.running.values().filter(|r| r.key.tag == tag).count()
    }

    /// Number of games of any request that have not ended yet.
    pub fn outstanding_total(&self) -> usize {
        let state = self.state();
        state.waiting.values().map(VecDeque::len).sum::<usize>() + state.running.len()
    }
}
