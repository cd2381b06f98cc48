//! Runtime connecting robots to the matchmaking server.
//!
//! This module defines the [`Harness`] type, which owns everything one run needs:
//!
//! - the [`Roster`] of robots, indexed by name and by the id the server gave them,
//! - one connection task per robot, answering the server's move requests through a
//!   [`SessionMultiplexer`],
//! - the shared [`MatchCorrelator`] turning `play:now` / `tournament:start` requests into futures.
//!
//! # Connection lifecycle
//!
//! [`Harness::start_agent`] logs a robot in (`add:user`, then waits for `login`), posts its
//! character text, and spawns its connection task. The task runs until the server closes the
//! connection, until [`Harness::disconnect`] aborts it, or until the first fatal error on the
//! connection (a strategy fault or a protocol violation). Fatal errors are reported by
//! [`Harness::next_exit`].
//!
//! # Example
//!
//! ```no_run
//! use robot_harness::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env();
//!     let mut harness = Harness::new(config);
//!     harness.start_all(&StrategyRegistry::builtin()).await?;
//!
//!     let result = harness.play_one("steve", "greg").await?;
//!     println!("{:?}", result.scores);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{error, info, instrument, trace, warn};

use crate::agent::{Agent, Roster};
use crate::agent_collector::collect_agents;
use crate::configuration::Configuration;
use crate::correlator::{GameResult, MatchCorrelator, PendingGame};
use crate::error::HarnessError;
use crate::logger::init_logger;
use crate::multiplexer::SessionMultiplexer;
use crate::protocol::{ClientEvent, RemoteId, ServerEvent};
use crate::strategies::StrategyRegistry;
use crate::transport::{connect_tcp, Connection};

/// Aggregate score of one tournament participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentScore {
    /// Robot name, or the raw server id if no robot of this harness has it.
    pub name: String,
    pub remote_id: RemoteId,
    pub score: u32,
}

type ConnectionExit = (String, Result<(), HarnessError>);

/// The main type for running robots against a server.
pub struct Harness {
    config: Configuration,
    roster: Roster,
    correlator: MatchCorrelator,
    tasks: JoinSet<ConnectionExit>,
    handles: HashMap<String, AbortHandle>,
}

impl Harness {
    /// Create a [`Harness`]. Installs the file logger if the configuration asks for it.
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> Harness {
        if config.log {
            if let Err(e) = init_logger(true) {
                eprintln!("{e:#}");
            }
        }
        trace!(?config);

        Harness {
            config,
            roster: Roster::new(),
            correlator: MatchCorrelator::new(),
            tasks: JoinSet::new(),
            handles: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn correlator(&self) -> &MatchCorrelator {
        &self.correlator
    }

    /// Robot named `name`.
    pub fn agent(&self, name: &str) -> Result<&Arc<Agent>, HarnessError> {
        self.roster.get(name)
    }

    /// Logs `agent` in over `conn` and starts serving its games.
    ///
    /// Returns once the server acknowledged the login; the games are played by a background
    /// task.
    #[instrument(skip_all, fields(agent = %agent.name, connection = %conn.id))]
    pub async fn start_agent(
        &mut self,
        agent: Arc<Agent>,
        mut conn: Connection,
    ) -> Result<Arc<Agent>, HarnessError> {
        let agent = self.roster.insert(agent);
        conn.sink.send(agent.login_event())?;

        let id = loop {
            match conn.recv().await {
                Some(ServerEvent::LoginAck { id }) => break id,
                Some(other) => warn!("ignoring {} before login", other.name()),
                None => return Err(HarnessError::Disconnected),
            }
        };
        agent.set_remote_id(id)?;
        self.roster.index_remote(&agent);
        agent.attach(conn.id, conn.sink.clone());
        info!(remote_id = %agent.require_remote_id()?, "logged in");

        conn.sink
            .send(ClientEvent::PostSource(agent.source.clone()))?;

        let multiplexer =
            SessionMultiplexer::new(agent.clone(), conn.sink.clone(), self.config.invalid_moves);
        let correlator = self.correlator.clone();
        let name = agent.name.clone();
        let inbound = conn.inbound;
        let handle = self.tasks.spawn(async move {
            let result = multiplexer.run(inbound, correlator).await;
            (name, result)
        });
        if let Some(previous) = self.handles.insert(agent.name.clone(), handle) {
            previous.abort();
        }
        Ok(agent)
    }

    /// Loads the configured character directory and connects every robot over TCP.
    #[instrument(skip_all)]
    pub async fn start_all(&mut self, registry: &StrategyRegistry) -> anyhow::Result<()> {
        let agents = collect_agents(self.config.characters.clone(), &self.config, registry)?;
        for agent in agents {
            let name = agent.name.clone();
            let conn = connect_tcp(&self.config.server).await?;
            self.start_agent(agent, conn)
                .await
                .with_context(|| format!("could not start '{name}'"))?;
        }
        info!(robots = self.roster.len(), "all robots connected");
        Ok(())
    }

    /// Starts one game between `initiator` and each of `opponents`, all under one request.
    pub fn play(
        &self,
        initiator: &str,
        opponents: &[&str],
    ) -> Result<Vec<PendingGame>, HarnessError> {
        let initiator = self.roster.get(initiator)?;
        let opponents = self.roster.select(opponents)?;
        self.correlator.request_matches(initiator, &opponents)
    }

    /// Plays one game between `a` and `b` and waits for its result.
    pub async fn play_one(&self, a: &str, b: &str) -> Result<GameResult, HarnessError> {
        let mut games = self.play(a, &[b])?;
        let Some(game) = games.pop() else {
            return Err(HarnessError::UnknownAgent(b.to_owned()));
        };
        game.result().await
    }

    /// Runs a round-robin tournament between `names` and waits for the aggregate scores.
    ///
    /// The request is sent on the first participant's connection.
    #[instrument(skip(self))]
    pub async fn tournament(&self, names: &[&str]) -> Result<Vec<TournamentScore>, HarnessError> {
        let participants = self.roster.select(names)?;
        let Some(requester) = participants.first() else {
            return Ok(vec![]);
        };
        let pending = self
            .correlator
            .request_tournament(requester, &participants)?;
        let scores = pending.result().await?;
        Ok(scores
            .into_iter()
            .map(|(remote_id, score)| TournamentScore {
                name: self
                    .roster
                    .by_remote_id(&remote_id)
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| remote_id.to_string()),
                remote_id,
                score,
            })
            .collect())
    }

    /// Drops the connection of `name`. The server sees it as a disconnect.
    pub fn disconnect(&mut self, name: &str) -> Result<(), HarnessError> {
        let handle = self
            .handles
            .remove(name)
            .ok_or_else(|| HarnessError::UnknownAgent(name.to_owned()))?;
        info!(agent = name, "disconnecting");
        handle.abort();
        Ok(())
    }

    /// Waits for the next connection task to stop on its own.
    ///
    /// Returns the robot's name with the reason, or `None` when no connection is left.
    /// Connections closed through [`Harness::disconnect`] are not reported.
    pub async fn next_exit(&mut self) -> Option<ConnectionExit> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    self.handles.remove(&name);
                    match &result {
                        Ok(()) => info!(agent = %name, "connection closed"),
                        Err(e) => error!(agent = %name, "connection failed: {e}"),
                    }
                    return Some((name, result));
                }
                Err(e) if e.is_cancelled() => continue,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        None
    }

    /// Serves every connection until the server closed all of them.
    ///
    /// A fatal error only ends its own connection; it is logged and the others keep playing.
    pub async fn run_until_closed(&mut self) {
        while let Some((name, result)) = self.next_exit().await {
            if let Err(e) = result {
                if self.config.verbose {
                    println!("\x1b[31m{name}: {e}\x1b[39m");
                }
            }
        }
    }

    /// Closes every connection.
    pub async fn shutdown(&mut self) {
        self.tasks.abort_all();
        self.handles.clear();
        while self.tasks.join_next().await.is_some() {}
        info!("harness shut down");
    }
}
