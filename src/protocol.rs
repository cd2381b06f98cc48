//! Events exchanged with the matchmaking server.
//!
//! The core only ever sees the typed [`ServerEvent`] and [`ClientEvent`]. On the wire every
//! event is one JSON object `{"event": <name>, "data": <payload>}`, using the server's event
//! names (`game:init`, `observe:over`, ...) and payload keys (`game_id`, `move`, `clientTag`).
//! See [`encode`] and [`decode`].

use std::fmt::{self, Display};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::game_interface::Move;

/// Server-assigned identifier of one game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

/// Server-assigned identifier of a logged-in robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

/// Client-generated tag matching asynchronous notifications to the request that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestTag(pub u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_owned())
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        RemoteId(value.to_owned())
    }
}

/// Events received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// `login`: the server accepted the robot and assigned it an id.
    #[serde(rename = "login")]
    LoginAck { id: RemoteId },
    /// `game:init`: the robot was chosen to play a new game.
    #[serde(rename = "game:init")]
    SessionStart {
        #[serde(rename = "game_id")]
        session: SessionId,
    },
    /// `game:next`: the opponent's move of the previous round; the robot must move again.
    #[serde(rename = "game:next")]
    SessionContinue {
        #[serde(rename = "game_id")]
        session: SessionId,
        previous: Move,
    },
    #[serde(rename = "game:over")]
    SessionEnd {
        #[serde(rename = "game_id")]
        session: SessionId,
    },
    /// `observe:init`: a game caused by one of our requests started.
    #[serde(rename = "observe:init")]
    MatchStarted {
        #[serde(rename = "clientTag")]
        tag: RequestTag,
        players: (RemoteId, RemoteId),
        #[serde(rename = "game_id")]
        session: SessionId,
    },
    /// `observe:progress`: snapshot after one round.
    #[serde(rename = "observe:progress")]
    MatchProgress {
        #[serde(rename = "game_id")]
        session: SessionId,
        moves: (Move, Move),
        scores: (u32, u32),
    },
    /// `observe:over`: final score of a game, in the order of `MatchStarted::players`.
    #[serde(rename = "observe:over")]
    MatchEnded {
        #[serde(rename = "game_id")]
        session: SessionId,
        scores: (u32, u32),
    },
    #[serde(rename = "tournament:started")]
    TournamentStarted {
        #[serde(rename = "clientTag")]
        tag: RequestTag,
    },
    /// `tournament:done`: aggregate score of every participant.
    #[serde(rename = "tournament:done")]
    TournamentDone {
        #[serde(rename = "clientTag")]
        tag: RequestTag,
        scores: Vec<(RemoteId, u32)>,
    },
}

/// Events sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "add:user")]
    Login {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        picture: Option<String>,
    },
    /// `post-source`: the character definition, sent once after login.
    #[serde(rename = "post-source")]
    PostSource(String),
    #[serde(rename = "game:move")]
    Move {
        #[serde(rename = "game_id")]
        session: SessionId,
        #[serde(rename = "move")]
        value: Move,
    },
    /// `play:now`: start one game against each listed opponent.
    #[serde(rename = "play:now")]
    MatchRequest {
        opponents: Vec<RemoteId>,
        #[serde(rename = "clientTag")]
        tag: RequestTag,
    },
    /// `tournament:start`: round-robin between all listed players.
    #[serde(rename = "tournament:start")]
    TournamentRequest {
        players: Vec<RemoteId>,
        #[serde(rename = "clientTag")]
        tag: RequestTag,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::LoginAck { .. } => "login",
            ServerEvent::SessionStart { .. } => "game:init",
            ServerEvent::SessionContinue { .. } => "game:next",
            ServerEvent::SessionEnd { .. } => "game:over",
            ServerEvent::MatchStarted { .. } => "observe:init",
            ServerEvent::MatchProgress { .. } => "observe:progress",
            ServerEvent::MatchEnded { .. } => "observe:over",
            ServerEvent::TournamentStarted { .. } => "tournament:started",
            ServerEvent::TournamentDone { .. } => "tournament:done",
        }
    }
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Login { .. } => "add:user",
            ClientEvent::PostSource(_) => "post-source",
            ClientEvent::Move { .. } => "game:move",
            ClientEvent::MatchRequest { .. } => "play:now",
            ClientEvent::TournamentRequest { .. } => "tournament:start",
        }
    }
}

/// Encodes one event as a single line of JSON, without the line terminator.
///
/// JSON escapes every control character inside strings, so the result never contains a newline.
pub fn encode<E: Serialize>(event: &E) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

/// Decodes one line produced by [`encode`].
pub fn decode<E: DeserializeOwned>(line: &str) -> serde_json::Result<E> {
    serde_json::from_str(line)
}
