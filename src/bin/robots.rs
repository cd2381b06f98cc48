//! `robots run` connects every character to the server and plays until the server goes away.
//!
//! `robots check` also connects the testing-only characters, plays a few games whose score is
//! known from the local simulator, prints PASS/FAIL for each, then runs a tournament.

use anyhow::bail;
use tracing::info;

use robot_harness::logger::init_logger;
use robot_harness::prelude::*;

/// Games played by `check`, first player is the initiator.
const CHECKED_GAMES: [(&str, &str); 3] = [("steve", "greg"), ("greg", "walter"), ("steve", "walter")];

const TOURNAMENT: [&str; 6] = ["steve", "greg", "walter", "skier", "cotton", "penguin"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    if !config.log() {
        init_logger(false)?;
    }

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_owned());
    match command.as_str() {
        "run" => run(config).await,
        "check" => check(config.with_testing(true)).await,
        other => bail!("unknown command '{other}', expected 'run' or 'check'"),
    }
}

async fn run(config: Configuration) -> anyhow::Result<()> {
    let mut harness = Harness::new(config);
    harness.start_all(&StrategyRegistry::builtin()).await?;
    harness.run_until_closed().await;
    Ok(())
}

async fn check(config: Configuration) -> anyhow::Result<()> {
    let rounds = config.rounds();
    let mut harness = Harness::new(config);
    harness.start_all(&StrategyRegistry::builtin()).await?;
    info!("all started!");

    let mut failures = 0;
    for (a, b) in CHECKED_GAMES {
        let expected = simulate(
            &*harness.agent(a)?.strategy,
            &*harness.agent(b)?.strategy,
            rounds,
        )
        .await?;
        let result = harness.play_one(a, b).await?;
        let actual = format!("{a} {}, {b} {}", result.scores.0, result.scores.1);
        if result.scores == expected {
            println!("PASS - {actual}");
        } else {
            failures += 1;
            println!(
                "FAIL - {actual} (expected {a} {}, {b} {})",
                expected.0, expected.1
            );
        }
    }

    let mut scores = harness.tournament(&TOURNAMENT).await?;
    scores.sort_by(|x, y| y.score.cmp(&x.score));
    for entry in &scores {
        println!("{} {}", entry.name, entry.score);
    }

    harness.shutdown().await;
    if failures > 0 {
        bail!("{failures} game(s) did not match the simulator");
    }
    Ok(())
}
