//! Config for the harness behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive: set the value to `"true"` to enable one.
//!
//! - `ROBOTS_SERVER` — Address of the matchmaking server (default: `127.0.0.1:3000`)
//! - `ROBOTS_CHARACTERS` — Directory holding the character files (default: `characters`)
//! - `ROBOTS_TESTING` — Also connect characters flagged `testingOnly` (default: `false`)
//! - `ROBOTS_ABORT_ON_INVALID_MOVE` — Treat an invalid move as fatal to its connection (default: `false`)
//! - `ROBOTS_ROUNDS` — Rounds per game used by local checks (default: `100`)
//! - `ROBOTS_LOG` — Enable logging to a file (default: `false`)
//! - `ROBOTS_VERBOSE` — Enable console output (default: `true`)

use std::path::PathBuf;

/// What to do when a strategy produces a move outside `COOPERATE` / `DEFECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidMovePolicy {
    /// Log a warning and send the move anyway; the server decides what it costs.
    #[default]
    Forward,
    /// Close the connection.
    Abort,
}

/// Configuration for harness behaviors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) server: String,
    pub(crate) characters: PathBuf,
    pub(crate) testing: bool,
    pub(crate) invalid_moves: InvalidMovePolicy,
    pub(crate) rounds: u32,
    pub(crate) verbose: bool,
    pub(crate) log: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The server is expected on `127.0.0.1:3000`.
    /// - Characters are read from `./characters`, skipping `testingOnly` ones.
    /// - Invalid moves are forwarded with a warning.
    /// - Games last 100 rounds.
    /// - The harness prints its progress to stdout, logging to file is disabled.
    pub fn new() -> Self {
        Self {
            server: "127.0.0.1:3000".to_owned(),
            characters: PathBuf::from("characters"),
            testing: false,
            invalid_moves: InvalidMovePolicy::Forward,
            rounds: 100,
            verbose: true,
            log: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Any unset variable, or a number that does not parse, leaves the default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        let abort = get_env_flag("ROBOTS_ABORT_ON_INVALID_MOVE", false);
        Self {
            server: std::env::var("ROBOTS_SERVER").unwrap_or(defaults.server),
            characters: std::env::var_os("ROBOTS_CHARACTERS")
                .map(PathBuf::from)
                .unwrap_or(defaults.characters),
            testing: get_env_flag("ROBOTS_TESTING", false),
            invalid_moves: if abort {
                InvalidMovePolicy::Abort
            } else {
                InvalidMovePolicy::Forward
            },
            rounds: std::env::var("ROBOTS_ROUNDS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.rounds),
            verbose: get_env_flag("ROBOTS_VERBOSE", true),
            log: get_env_flag("ROBOTS_LOG", false),
        }
    }

    /// Set the server address (`host:port`).
    pub fn with_server(mut self, value: impl Into<String>) -> Self {
        self.server = value.into();
        self
    }

    /// Set the directory holding the character files.
    pub fn with_characters(mut self, value: impl Into<PathBuf>) -> Self {
        self.characters = value.into();
        self
    }

    /// Enable or disable testing mode.
    ///
    /// When enabled, characters with a `testingOnly: true` header are connected too.
    pub fn with_testing(mut self, value: bool) -> Self {
        self.testing = value;
        self
    }

    /// Choose how invalid moves are handled.
    pub fn with_invalid_moves(mut self, value: InvalidMovePolicy) -> Self {
        self.invalid_moves = value;
        self
    }

    /// Set the number of rounds per game used by local checks.
    pub fn with_rounds(mut self, value: u32) -> Self {
        self.rounds = value;
        self
    }

    /// Enable or disable console output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn characters(&self) -> &std::path::Path {
        &self.characters
    }

    pub fn testing(&self) -> bool {
        self.testing
    }

    pub fn invalid_moves(&self) -> InvalidMovePolicy {
        self.invalid_moves
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn log(&self) -> bool {
        self.log
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
