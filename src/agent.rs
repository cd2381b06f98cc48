use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    hash::Hash,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{HarnessError, ProtocolViolation},
    game_interface::Strategy,
    protocol::{ClientEvent, RemoteId},
    transport::{ClientSink, ConnectionId},
};

/// Header values of a character file (`// key: value` lines).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentMetadata(pub BTreeMap<String, String>);

impl AgentMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Display name shown by the server.
    pub fn display_name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn picture(&self) -> Option<&str> {
        self.get("picture")
    }

    /// Characters flagged `testingOnly: true` only connect in testing mode.
    pub fn testing_only(&self) -> bool {
        self.get("testingOnly")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// A robot: a named strategy plus what the server told us about it.
///
/// `connection_id` and `remote_id` are set once, when the robot connects and logs in, and never
/// change afterwards.
pub struct Agent {
    pub name: String,
    pub metadata: AgentMetadata,
    pub strategy: Arc<dyn Strategy>,
    /// Character definition text, posted to the server after login.
    pub source: String,
    connection_id: OnceLock<ConnectionId>,
    remote_id: OnceLock<RemoteId>,
    sink: OnceLock<ClientSink>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("connection_id", &self.connection_id.get())
            .field("remote_id", &self.remote_id.get())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        metadata: AgentMetadata,
        strategy: Arc<dyn Strategy>,
    ) -> Agent {
        Agent {
            name: name.into(),
            metadata,
            strategy,
            source: String::new(),
            connection_id: OnceLock::new(),
            remote_id: OnceLock::new(),
            sink: OnceLock::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Agent {
        self.source = source.into();
        self
    }

    /// Login name used on the server.
    pub fn username(&self) -> String {
        format!("robot-{}", self.name)
    }

    pub fn login_event(&self) -> ClientEvent {
        ClientEvent::Login {
            username: self.username(),
            name: self.metadata.display_name().map(str::to_owned),
            picture: self.metadata.picture().map(str::to_owned),
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id.get().copied()
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.get()
    }

    /// Remote id, or an error naming the robot if it never logged in.
    pub fn require_remote_id(&self) -> Result<&RemoteId, HarnessError> {
        self.remote_id
            .get()
            .ok_or_else(|| HarnessError::NotLoggedIn(self.name.clone()))
    }

    /// Outbound half of the robot's connection.
    pub fn sink(&self) -> Result<&ClientSink, HarnessError> {
        self.sink
            .get()
            .ok_or_else(|| HarnessError::NotLoggedIn(self.name.clone()))
    }

    pub(crate) fn attach(&self, connection_id: ConnectionId, sink: ClientSink) {
        // a robot is connected once per harness; later calls are ignored
        let _ = self.connection_id.set(connection_id);
        let _ = self.sink.set(sink);
    }

    pub(crate) fn set_remote_id(&self, id: RemoteId) -> Result<(), ProtocolViolation> {
        self.remote_id
            .set(id)
            .map_err(|_| ProtocolViolation::DuplicateLogin)
    }
}

/// Every robot known to one harness, by name and by server id.
///
/// The roster is the single owner of the robot collection; components that need robots get it
/// passed explicitly.
#[derive(Debug, Default)]
pub struct Roster {
    agents: Vec<Arc<Agent>>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<RemoteId, usize>,
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    /// Adds a robot. A robot with the same name replaces the previous one in the name index.
    pub fn insert(&mut self, agent: Arc<Agent>) -> Arc<Agent> {
        let index = self.agents.len();
        self.by_name.insert(agent.name.clone(), index);
        if let Some(id) = agent.remote_id() {
            self.by_id.insert(id.clone(), index);
        }
        self.agents.push(agent.clone());
        agent
    }

    /// Indexes a robot by the id it got at login.
    pub(crate) fn index_remote(&mut self, agent: &Agent) {
        let (Some(&index), Some(id)) = (self.by_name.get(&agent.name), agent.remote_id()) else {
            return;
        };
        self.by_id.insert(id.clone(), index);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Agent>, HarnessError> {
        self.by_name
            .get(name)
            .map(|&i| &self.agents[i])
            .ok_or_else(|| HarnessError::UnknownAgent(name.to_owned()))
    }

    pub fn by_remote_id(&self, id: &RemoteId) -> Option<&Arc<Agent>> {
        self.by_id.get(id).map(|&i| &self.agents[i])
    }

    /// Looks up several robots by name, in order.
    pub fn select(&self, names: &[&str]) -> Result<Vec<Arc<Agent>>, HarnessError> {
        names.iter().map(|n| self.get(n).cloned()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
