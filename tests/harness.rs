use std::sync::Arc;
use std::time::Duration;

use crate::referee::Referee;

use robot_harness::agent::{Agent, AgentMetadata};
use robot_harness::error::{HarnessError, StrategyFault};
use robot_harness::prelude::*;
use tokio::sync::Notify;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod referee;

const ROUNDS: u32 = 100;

fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn strategy(name: &str) -> Arc<dyn Strategy> {
    StrategyRegistry::builtin()
        .get(name)
        .unwrap_or_else(|| panic!("no builtin strategy '{name}'"))
}

/// Connects every `(robot, strategy)` to `referee`.
async fn start(referee: &Referee, config: Configuration, robots: &[(&str, Arc<dyn Strategy>)]) -> Harness {
    init_test_logger();
    let mut harness = Harness::new(config.with_verbose(false));
    for (name, strategy) in robots {
        let agent = Agent::new(*name, AgentMetadata::default(), strategy.clone())
            .with_source(format!("{name} plays fair"));
        harness
            .start_agent(Arc::new(agent), referee.connect())
            .await
            .unwrap();
    }
    harness
}

async fn expected(a: &str, b: &str, rounds: u32) -> (u32, u32) {
    simulate(&*strategy(a), &*strategy(b), rounds).await.unwrap()
}

#[tokio::test]
async fn remote_games_match_the_simulator() {
    let referee = Referee::new(ROUNDS);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("steve", strategy("always-defect")),
            ("greg", strategy("always-cooperate")),
            ("walter", strategy("tit-for-tat")),
        ],
    )
    .await;
    assert!(harness.agent("greg").unwrap().remote_id().is_some());

    let result = harness.play_one("steve", "greg").await.unwrap();
    assert_eq!(result.scores, (500, 0));
    assert_eq!(result.scores, expected("always-defect", "always-cooperate", ROUNDS).await);

    let result = harness.play_one("greg", "walter").await.unwrap();
    assert_eq!(result.scores, (300, 300));

    let result = harness.play_one("steve", "walter").await.unwrap();
    assert_eq!(result.scores, (104, 99));
    assert_eq!(
        result.players.0,
        harness.agent("steve").unwrap().remote_id().unwrap().clone()
    );
}

#[tokio::test]
async fn results_follow_request_orientation() {
    let referee = Referee::reversing(ROUNDS);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("steve", strategy("always-defect")),
            ("walter", strategy("tit-for-tat")),
        ],
    )
    .await;

    let result = harness.play_one("walter", "steve").await.unwrap();
    assert_eq!(result.scores, (99, 104));
}

#[tokio::test]
async fn simultaneous_games_do_not_share_state() {
    let referee = Referee::new(ROUNDS);
    let opponents = [
        ("steve", "always-defect"),
        ("greg", "always-cooperate"),
        ("cotton", "grudger"),
        ("skier", "alternator"),
        ("penguin", "pavlov"),
    ];
    let mut robots = vec![("walter", strategy("tit-for-tat"))];
    robots.extend(opponents.iter().map(|(name, s)| (*name, strategy(s))));
    let harness = start(&referee, Configuration::new(), &robots).await;

    let names = opponents.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    let games = harness.play("walter", &names).unwrap();
    assert_eq!(games.len(), opponents.len());
    for (game, (_, opponent)) in games.into_iter().zip(opponents) {
        let result = game.result().await.unwrap();
        assert_eq!(
            result.scores,
            expected("tit-for-tat", opponent, ROUNDS).await,
            "walter vs {opponent}"
        );
    }
}

#[tokio::test]
async fn repeated_pair_under_one_request() {
    let referee = Referee::new(ROUNDS);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("penguin", strategy("pavlov")),
            ("skier", strategy("alternator")),
        ],
    )
    .await;

    let games = harness
        .play("penguin", &["skier", "skier", "skier", "skier"])
        .unwrap();
    let tag = games[0].tag();
    assert!(games.iter().all(|g| g.tag() == tag));

    let standalone = expected("pavlov", "alternator", ROUNDS).await;
    let mut sessions = vec![];
    for game in games {
        let result = game.result().await.unwrap();
        assert_eq!(result.scores, standalone);
        sessions.push(result.session);
    }
    sessions.sort();
    sessions.dedup();
    assert_eq!(sessions.len(), 4);
    assert_eq!(harness.correlator().outstanding_total(), 0);
}

#[tokio::test]
async fn tournament_aggregates_every_pair() {
    let referee = Referee::new(ROUNDS);
    let lineup = [
        ("steve", "always-defect"),
        ("greg", "always-cooperate"),
        ("walter", "tit-for-tat"),
        ("cotton", "grudger"),
    ];
    let robots = lineup
        .iter()
        .map(|(name, s)| (*name, strategy(s)))
        .collect::<Vec<_>>();
    let harness = start(&referee, Configuration::new(), &robots).await;

    let participants = lineup
        .iter()
        .map(|(name, _)| harness.agent(name).unwrap().clone())
        .collect::<Vec<_>>();
    let pending = harness
        .correlator()
        .request_tournament(&participants[0], &participants)
        .unwrap();
    let tag = pending.tag();
    assert_eq!(harness.correlator().outstanding(tag), 6);

    let mut totals = vec![0; lineup.len()];
    for i in 0..lineup.len() {
        for j in i + 1..lineup.len() {
            let (a, b) = expected(lineup[i].1, lineup[j].1, ROUNDS).await;
            totals[i] += a;
            totals[j] += b;
        }
    }

    let scores = pending.result().await.unwrap();
    assert_eq!(scores.len(), lineup.len());
    for ((id, score), (participant, total)) in scores.iter().zip(participants.iter().zip(&totals)) {
        assert_eq!(Some(id), participant.remote_id());
        assert_eq!(score, total, "{}", participant.name);
    }
    assert_eq!(harness.correlator().outstanding(tag), 0);
}

#[tokio::test]
async fn tournament_maps_scores_to_names() {
    let referee = Referee::new(10);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("steve", strategy("always-defect")),
            ("greg", strategy("always-cooperate")),
            ("walter", strategy("tit-for-tat")),
        ],
    )
    .await;

    let scores = harness.tournament(&["steve", "greg", "walter"]).await.unwrap();
    let by_name = |name: &str| scores.iter().find(|s| s.name == name).unwrap().score;
    // steve: 50 vs greg, 14 vs walter; greg: 0 + 30; walter: 9 + 30
    assert_eq!(by_name("steve"), 64);
    assert_eq!(by_name("greg"), 30);
    assert_eq!(by_name("walter"), 39);
}

#[tokio::test]
async fn invalid_move_is_forfeited() {
    let referee = Referee::new(ROUNDS);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("greg", strategy("always-cooperate")),
            ("blunder", strategy("blunder:38")),
        ],
    )
    .await;

    let result = harness.play_one("greg", "blunder").await.unwrap();
    let forfeit = expected_forfeit(
        &*strategy("always-cooperate"),
        &*strategy("blunder:38"),
        ROUNDS,
        38,
        Side::Second,
    )
    .await
    .unwrap();
    assert_eq!(forfeit, (426, 111));
    assert_eq!(result.scores, forfeit);

    // the connection survives a forwarded invalid move
    let again = harness.play_one("greg", "blunder").await.unwrap();
    assert_eq!(again.scores, (426, 111));
}

#[tokio::test]
async fn invalid_move_aborts_when_configured() {
    let referee = Referee::new(ROUNDS);
    let mut harness = start(
        &referee,
        Configuration::new().with_invalid_moves(InvalidMovePolicy::Abort),
        &[
            ("greg", strategy("always-cooperate")),
            ("blunder", strategy("blunder:38")),
        ],
    )
    .await;

    let game = harness.play("greg", &["blunder"]).unwrap().pop().unwrap();
    let (name, exit) = harness.next_exit().await.unwrap();
    assert_eq!(name, "blunder");
    assert!(matches!(
        exit,
        Err(HarnessError::Strategy {
            fault: StrategyFault::InvalidMove { turn: 38, .. },
            ..
        })
    ));
    // the server forfeits the dropped connection the same way
    assert_eq!(game.result().await.unwrap().scores, (426, 111));
}

#[tokio::test]
async fn pending_moves_over_the_wire() {
    let rounds = 20;
    let referee = Referee::new(rounds);
    let harness = start(
        &referee,
        Configuration::new(),
        &[
            ("froggy", strategy("think:2")),
            ("steve", strategy("always-defect")),
            ("greg", strategy("always-cooperate")),
        ],
    )
    .await;

    let games = harness.play("froggy", &["steve", "greg"]).unwrap();
    let mut results = vec![];
    for game in games {
        results.push(game.result().await.unwrap().scores);
    }
    assert_eq!(
        results,
        vec![
            expected("think:2", "always-defect", rounds).await,
            expected("think:2", "always-cooperate", rounds).await,
        ]
    );
}

/// Cooperates until `stall_at`, then never answers again.
fn staller(stall_at: u32, reached: Arc<Notify>) -> Arc<dyn Strategy> {
    from_fn(move || {
        let reached = reached.clone();
        let mut round = 0;
        Box::new(move |_previous: Option<Move>| {
            round += 1;
            if round < stall_at {
                return Some(MoveOutcome::from(Move::Cooperate));
            }
            reached.notify_one();
            Some(MoveOutcome::pending(std::future::pending::<Move>()))
        })
    })
}

#[tokio::test]
async fn disconnect_completes_the_game_quickly() {
    const STALL_AT: u32 = 10;
    let reached = Arc::new(Notify::new());
    let referee = Referee::new(ROUNDS);
    let mut harness = start(
        &referee,
        Configuration::new(),
        &[
            ("greg", strategy("always-cooperate")),
            ("staller", staller(STALL_AT, reached.clone())),
        ],
    )
    .await;

    let game = harness.play("greg", &["staller"]).unwrap().pop().unwrap();
    reached.notified().await;
    harness.disconnect("staller").unwrap();

    let result = tokio::time::timeout(Duration::from_millis(200), game.result())
        .await
        .expect("no completion within 200ms")
        .unwrap();
    let (greg, staller) = result.scores;
    assert!(
        (STALL_AT - 1) * 3 <= staller && staller <= STALL_AT * 3,
        "staller scored {staller}"
    );
    assert_eq!(greg + staller, (STALL_AT - 1) * 6 + (ROUNDS - STALL_AT + 1) * 5);
    assert!(matches!(
        harness.disconnect("staller"),
        Err(HarnessError::UnknownAgent(_))
    ));
}

#[tokio::test]
async fn unknown_robots_are_rejected() {
    let referee = Referee::new(ROUNDS);
    let harness = start(&referee, Configuration::new(), &[("greg", strategy("always-cooperate"))]).await;
    assert!(matches!(
        harness.play("greg", &["nobody"]),
        Err(HarnessError::UnknownAgent(name)) if name == "nobody"
    ));
}
