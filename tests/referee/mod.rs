//! In-process matchmaking server for integration tests.
//!
//! Plays games the way the real server does: both players move, the round is paid out from the
//! payout table, and each gets the other's move with the next `game:next`. An invalid move or a
//! disconnect forfeits the game: from that round on the other player earns 5 per round and the
//! offender nothing. Whoever requested a game receives its `observe:*` notifications, tagged
//! with the request's tag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use robot_harness::game_interface::Move;
use robot_harness::protocol::{ClientEvent, RemoteId, RequestTag, ServerEvent, SessionId};
use robot_harness::simulator::{payout, FORFEIT_PAYOUT};
use robot_harness::transport::{in_memory, Connection, ServerEndpoint};
use tokio::sync::mpsc;
use tracing::{debug, info};

enum Input {
    Join {
        client: usize,
        tx: mpsc::UnboundedSender<ServerEvent>,
    },
    Event {
        client: usize,
        event: ClientEvent,
    },
    Left {
        client: usize,
    },
}

/// Handle to a running referee. Every connection it hands out is one client.
pub struct Referee {
    inputs: mpsc::UnboundedSender<Input>,
    next_client: AtomicUsize,
}

impl Referee {
    /// A referee playing `rounds` rounds per game.
    pub fn new(rounds: u32) -> Referee {
        Self::start(rounds, false)
    }

    /// Same, but lists the players of every `observe:init` the other way round.
    pub fn reversing(rounds: u32) -> Referee {
        Self::start(rounds, true)
    }

    fn start(rounds: u32, reverse: bool) -> Referee {
        let (inputs, rx) = mpsc::unbounded_channel();
        let table = Table {
            rounds,
            reverse,
            clients: HashMap::new(),
            by_id: HashMap::new(),
            games: HashMap::new(),
            tournaments: HashMap::new(),
            next_user: 1,
            next_game: 1,
        };
        tokio::spawn(table.run(rx));
        Referee {
            inputs,
            next_client: AtomicUsize::new(0),
        }
    }

    pub fn connect(&self) -> Connection {
        let (conn, endpoint) = in_memory();
        let client = self.next_client.fetch_add(1, Ordering::Relaxed);
        let _ = self.inputs.send(Input::Join {
            client,
            tx: endpoint.sender(),
        });
        tokio::spawn(forward(client, endpoint, self.inputs.clone()));
        conn
    }
}

/// Moves one client's events to the table, then reports the disconnect.
async fn forward(client: usize, mut endpoint: ServerEndpoint, inputs: mpsc::UnboundedSender<Input>) {
    let watch = endpoint.sender();
    loop {
        tokio::select! {
            event = endpoint.recv() => match event {
                Some(event) => {
                    if inputs.send(Input::Event { client, event }).is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = watch.closed() => break,
        }
    }
    let _ = inputs.send(Input::Left { client });
}

struct Client {
    tx: mpsc::UnboundedSender<ServerEvent>,
    id: Option<RemoteId>,
}

struct Game {
    players: [usize; 2],
    ids: [RemoteId; 2],
    round: u32,
    moves: [Option<Move>; 2],
    scores: [u32; 2],
    observer: (usize, RequestTag),
    tournament: Option<(usize, RequestTag)>,
}

struct Tournament {
    remaining: usize,
    totals: Vec<(RemoteId, u32)>,
}

struct Table {
    rounds: u32,
    reverse: bool,
    clients: HashMap<usize, Client>,
    by_id: HashMap<RemoteId, usize>,
    games: HashMap<SessionId, Game>,
    tournaments: HashMap<(usize, RequestTag), Tournament>,
    next_user: u32,
    next_game: u32,
}

impl Table {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            match input {
                Input::Join { client, tx } => {
                    self.clients.insert(client, Client { tx, id: None });
                }
                Input::Event { client, event } => self.on_event(client, event),
                Input::Left { client } => self.on_left(client),
            }
        }
    }

    fn send(&self, client: usize, event: ServerEvent) {
        if let Some(c) = self.clients.get(&client) {
            let _ = c.tx.send(event);
        }
    }

    fn on_event(&mut self, client: usize, event: ClientEvent) {
        match event {
            ClientEvent::Login { username, .. } => {
                let id = RemoteId(format!("user-{}", self.next_user));
                self.next_user += 1;
                info!(%username, %id, "login");
                self.by_id.insert(id.clone(), client);
                if let Some(c) = self.clients.get_mut(&client) {
                    c.id = Some(id.clone());
                }
                self.send(client, ServerEvent::LoginAck { id });
            }
            ClientEvent::PostSource(source) => debug!(client, "posted {} bytes", source.len()),
            ClientEvent::Move { session, value } => self.on_move(client, session, value),
            ClientEvent::MatchRequest { opponents, tag } => {
                let Some(me) = self.clients.get(&client).and_then(|c| c.id.clone()) else {
                    return;
                };
                for opponent in opponents {
                    let Some(&other) = self.by_id.get(&opponent) else {
                        continue;
                    };
                    self.start_game([client, other], [me.clone(), opponent], (client, tag), None);
                }
            }
            ClientEvent::TournamentRequest { players, tag } => {
                self.send(client, ServerEvent::TournamentStarted { tag });
                let n = players.len();
                self.tournaments.insert(
                    (client, tag),
                    Tournament {
                        remaining: n * n.saturating_sub(1) / 2,
                        totals: players.iter().map(|p| (p.clone(), 0)).collect(),
                    },
                );
                for i in 0..n {
                    for j in i + 1..n {
                        let (Some(&a), Some(&b)) =
                            (self.by_id.get(&players[i]), self.by_id.get(&players[j]))
                        else {
                            continue;
                        };
                        self.start_game(
                            [a, b],
                            [players[i].clone(), players[j].clone()],
                            (client, tag),
                            Some((client, tag)),
                        );
                    }
                }
            }
        }
    }

    fn start_game(
        &mut self,
        players: [usize; 2],
        ids: [RemoteId; 2],
        observer: (usize, RequestTag),
        tournament: Option<(usize, RequestTag)>,
    ) {
        let session = SessionId(format!("game-{}", self.next_game));
        self.next_game += 1;
        let listed = if self.reverse {
            (ids[1].clone(), ids[0].clone())
        } else {
            (ids[0].clone(), ids[1].clone())
        };
        self.send(
            observer.0,
            ServerEvent::MatchStarted {
                tag: observer.1,
                players: listed,
                session: session.clone(),
            },
        );
        for &p in &players {
            self.send(
                p,
                ServerEvent::SessionStart {
                    session: session.clone(),
                },
            );
        }
        self.games.insert(
            session,
            Game {
                players,
                ids,
                round: 1,
                moves: [None, None],
                scores: [0, 0],
                observer,
                tournament,
            },
        );
    }

    fn on_move(&mut self, client: usize, session: SessionId, value: Move) {
        let Some(game) = self.games.get_mut(&session) else {
            debug!(%session, "move for a finished game");
            return;
        };
        let Some(side) = game.players.iter().position(|&p| p == client) else {
            return;
        };
        if game.moves[side].is_some() {
            return;
        }
        game.moves[side] = Some(value);
        let (Some(a), Some(b)) = (game.moves[0].clone(), game.moves[1].clone()) else {
            return;
        };
        game.moves = [None, None];

        let Some((pa, pb)) = payout(&a, &b) else {
            let offender = if a.is_valid() { 1 } else { 0 };
            self.forfeit(&session, offender);
            return;
        };
        game.scores[0] += pa;
        game.scores[1] += pb;
        let progress = ServerEvent::MatchProgress {
            session: session.clone(),
            moves: (a.clone(), b.clone()),
            scores: (game.scores[0], game.scores[1]),
        };
        let observer = game.observer.0;
        let players = game.players;
        let finished = game.round == self.rounds;
        game.round += 1;

        self.send(observer, progress);
        if finished {
            self.finish(&session);
            return;
        }
        self.send(
            players[0],
            ServerEvent::SessionContinue {
                session: session.clone(),
                previous: b,
            },
        );
        self.send(
            players[1],
            ServerEvent::SessionContinue {
                session,
                previous: a,
            },
        );
    }

    /// Pays the rest of the game, current round included, to the other player.
    fn forfeit(&mut self, session: &SessionId, offender: usize) {
        let Some(game) = self.games.get_mut(session) else {
            return;
        };
        let remaining = self.rounds + 1 - game.round;
        game.scores[1 - offender] += remaining * FORFEIT_PAYOUT;
        info!(%session, offender, round = game.round, "forfeit");
        self.finish(session);
    }

    fn finish(&mut self, session: &SessionId) {
        let Some(game) = self.games.remove(session) else {
            return;
        };
        for &p in &game.players {
            self.send(
                p,
                ServerEvent::SessionEnd {
                    session: session.clone(),
                },
            );
        }
        let scores = if self.reverse {
            (game.scores[1], game.scores[0])
        } else {
            (game.scores[0], game.scores[1])
        };
        self.send(
            game.observer.0,
            ServerEvent::MatchEnded {
                session: session.clone(),
                scores,
            },
        );

        let Some(key) = game.tournament else {
            return;
        };
        let Some(tournament) = self.tournaments.get_mut(&key) else {
            return;
        };
        for (id, total) in tournament.totals.iter_mut() {
            if *id == game.ids[0] {
                *total += game.scores[0];
            } else if *id == game.ids[1] {
                *total += game.scores[1];
            }
        }
        tournament.remaining -= 1;
        if tournament.remaining == 0 {
            if let Some(done) = self.tournaments.remove(&key) {
                self.send(
                    key.0,
                    ServerEvent::TournamentDone {
                        tag: key.1,
                        scores: done.totals,
                    },
                );
            }
        }
    }

    fn on_left(&mut self, client: usize) {
        info!(client, "disconnected");
        let sessions = self
            .games
            .iter()
            .filter_map(|(session, game)| {
                let side = game.players.iter().position(|&p| p == client)?;
                Some((session.clone(), side))
            })
            .collect::<Vec<_>>();
        for (session, side) in sessions {
            self.forfeit(&session, side);
        }
        self.clients.remove(&client);
    }
}
