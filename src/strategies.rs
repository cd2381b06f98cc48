//! Built-in robot strategies and the registry character files pick them from.
//!
//! Character files name their strategy in a `// strategy: ...` header. Plain strategies are
//! named directly (`tit-for-tat`); parameterised ones take a number after a colon
//! (`blunder:38`, `think:20`).

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use crate::game_interface::{from_fn, Move, MoveOutcome, MoveProcess, Strategy};

/// Plays the same move every round.
pub struct Constant(pub Move);

impl MoveProcess for Constant {
    fn advance(&mut self, _opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        Some(MoveOutcome::Immediate(self.0.clone()))
    }
}

/// Opens with `first`, then repeats whatever the opponent did last.
pub struct TitForTat {
    pub first: Move,
}

impl MoveProcess for TitForTat {
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        let next = opponent_previous
            .filter(Move::is_valid)
            .unwrap_or_else(|| self.first.clone());
        Some(next.into())
    }
}

/// Cooperates until betrayed once, then defects forever.
#[derive(Default)]
pub struct Grudger {
    betrayed: bool,
}

impl MoveProcess for Grudger {
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        self.betrayed |= opponent_previous == Some(Move::Defect);
        let next = if self.betrayed { Move::Defect } else { Move::Cooperate };
        Some(next.into())
    }
}

/// Cooperates on odd rounds, defects on even ones.
#[derive(Default)]
pub struct Alternator {
    round: u32,
}

impl MoveProcess for Alternator {
    fn advance(&mut self, _opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        self.round += 1;
        let next = if self.round % 2 == 1 { Move::Cooperate } else { Move::Defect };
        Some(next.into())
    }
}

/// Win-stay, lose-shift: repeats its move after a good round (3 or 5 points), switches after a
/// bad one.
pub struct Pavlov {
    last: Move,
}

impl Default for Pavlov {
    fn default() -> Self {
        Pavlov {
            last: Move::Cooperate,
        }
    }
}

impl MoveProcess for Pavlov {
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        if let Some(theirs) = opponent_previous {
            // staying pays off exactly when the opponent cooperated
            if theirs != Move::Cooperate {
                self.last = match self.last {
                    Move::Cooperate => Move::Defect,
                    _ => Move::Cooperate,
                };
            }
        }
        Some(self.last.clone().into())
    }
}

/// Cooperates, except on round `at` where it plays an invalid move.
pub struct Blunder {
    round: u32,
    at: u32,
}

impl MoveProcess for Blunder {
    fn advance(&mut self, _opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        self.round += 1;
        if self.round == self.at {
            return Some(Move::Other("BLUNDER".to_owned()).into());
        }
        Some(Move::Cooperate.into())
    }
}

/// Cooperates, then returns on round `at` instead of moving.
pub struct Quitter {
    round: u32,
    at: u32,
}

impl MoveProcess for Quitter {
    fn advance(&mut self, _opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        self.round += 1;
        (self.round < self.at).then(|| Move::Cooperate.into())
    }
}

/// Tit-for-tat that takes `delay` to decide every move.
pub struct Thinker {
    inner: TitForTat,
    delay: Duration,
}

impl MoveProcess for Thinker {
    fn advance(&mut self, opponent_previous: Option<Move>) -> Option<MoveOutcome> {
        let decided = match self.inner.advance(opponent_previous)? {
            MoveOutcome::Immediate(m) => m,
            pending => return Some(pending),
        };
        let delay = self.delay;
        Some(MoveOutcome::pending(async move {
            tokio::time::sleep(delay).await;
            decided
        }))
    }
}

enum Entry {
    Fixed(Arc<dyn Strategy>),
    Parameterised(fn(u32) -> Arc<dyn Strategy>),
}

/// Strategies by name.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in strategy.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "always-cooperate",
            from_fn(|| Box::new(Constant(Move::Cooperate))),
        );
        registry.register("always-defect", from_fn(|| Box::new(Constant(Move::Defect))));
        registry.register(
            "tit-for-tat",
            from_fn(|| {
                Box::new(TitForTat {
                    first: Move::Cooperate,
                })
            }),
        );
        registry.register(
            "suspicious-tit-for-tat",
            from_fn(|| Box::new(TitForTat { first: Move::Defect })),
        );
        registry.register("grudger", from_fn(|| Box::<Grudger>::default()));
        registry.register("alternator", from_fn(|| Box::<Alternator>::default()));
        registry.register("pavlov", from_fn(|| Box::<Pavlov>::default()));
        registry.register_parameterised("blunder", |at| {
            from_fn(move || Box::new(Blunder { round: 0, at }))
        });
        registry.register_parameterised("quit", |at| {
            from_fn(move || Box::new(Quitter { round: 0, at }))
        });
        registry.register_parameterised("think", |millis| {
            from_fn(move || {
                Box::new(Thinker {
                    inner: TitForTat {
                        first: Move::Cooperate,
                    },
                    delay: Duration::from_millis(u64::from(millis)),
                })
            })
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        self.entries.insert(name.into(), Entry::Fixed(strategy));
    }

    pub fn register_parameterised(
        &mut self,
        name: impl Into<String>,
        build: fn(u32) -> Arc<dyn Strategy>,
    ) {
        self.entries
            .insert(name.into(), Entry::Parameterised(build));
    }

    /// Resolves `name` or `name:parameter`.
    pub fn get(&self, query: &str) -> Option<Arc<dyn Strategy>> {
        let (name, param) = match query.trim().split_once(':') {
            Some((name, param)) => (name.trim(), Some(param.trim().parse::<u32>().ok()?)),
            None => (query.trim(), None),
        };
        match (self.entries.get(name)?, param) {
            (Entry::Fixed(strategy), None) => Some(strategy.clone()),
            (Entry::Parameterised(build), Some(param)) => Some(build(param)),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
