//! # Robot Harness
//!
//! A client harness connecting iterated prisoner's dilemma robots to a matchmaking server.
//!
//! It provides:
//! - Loading robots from a directory of character files (`agent_collector`)
//! - One connection per robot, answering the server's move requests for any number of
//!   simultaneous games ([`multiplexer`])
//! - Requests for games and tournaments, resolved from the server's asynchronous notifications
//!   ([`correlator`])
//! - A local simulator computing the expected score of a game ([`simulator`])
//!
//! Every game is a fixed number of rounds where both robots pick `COOPERATE` or `DEFECT`; the
//! server pays 3/3 for mutual cooperation, 1/1 for mutual defection and 5/0 to a defector
//! facing a cooperator.
//!
//! # Documentation Overview
//!
//! - To write a robot, see the [`Strategy`](crate::game_interface::Strategy) and
//!   [`MoveProcess`](crate::game_interface::MoveProcess) traits, and the built-in
//!   [`strategies`].
//! - For running robots against a server, see the [`harness`] module.
//! - For configuring the harness, see [`Configuration`](crate::configuration::Configuration).
//!
//! # Character files
//!
//! A robot is a `*.robot` file in the characters directory. Header lines of the form
//! `// key: value` describe it, the rest of the file is free text posted to the server:
//!
//! ```text
//! // name: Walter
//! // picture: https://example.com/walter.png
//! // strategy: tit-for-tat
//!
//! Walter is fair: he does to you what you did to him.
//! ```
//!
//! The `strategy` header names a strategy of the
//! [`StrategyRegistry`](crate::strategies::StrategyRegistry). Robots with `testingOnly: true`
//! only connect in testing mode.
//!
//! # Usage Example
//!
//! Checking a remote game against the local simulator:
//!
//! ```no_run
//! use robot_harness::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = StrategyRegistry::builtin();
//!     let mut harness = Harness::new(Configuration::from_env().with_testing(true));
//!     harness.start_all(&registry).await?;
//!
//!     let steve = harness.agent("steve")?.strategy.clone();
//!     let greg = harness.agent("greg")?.strategy.clone();
//!     let expected = simulate(&*steve, &*greg, 100).await?;
//!
//!     let result = harness.play_one("steve", "greg").await?;
//!     assert_eq!(result.scores, expected);
//!     Ok(())
//! }
//! ```

pub use anyhow;
pub mod agent;
pub mod agent_collector;
pub mod configuration;
pub mod correlator;
pub mod error;
pub mod game_interface;
pub mod harness;
pub mod logger;
pub mod multiplexer;
pub mod protocol;
pub mod simulator;
pub mod strategies;
pub mod transport;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use robot_harness::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`Harness`](crate::harness::Harness)
/// - the [`Strategy`](crate::game_interface::Strategy) traits and the built-in registry
/// - the simulator entry points
pub mod prelude {
    pub use crate::configuration::{Configuration, InvalidMovePolicy};
    pub use crate::error::HarnessError;
    pub use crate::game_interface::{from_fn, Move, MoveOutcome, MoveProcess, Strategy};
    pub use crate::harness::{Harness, TournamentScore};
    pub use crate::simulator::{expected_forfeit, simulate, Side};
    pub use crate::strategies::StrategyRegistry;
}
