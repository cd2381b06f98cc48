use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use tracing::{error, info, instrument, warn};

use crate::{
    agent::Agent, agent_collector::header::split_character, configuration::Configuration,
    strategies::StrategyRegistry,
};

mod header;

/// Extension of character files.
pub const CHARACTER_EXTENSION: &str = "robot";

/// Loads every character file of `directory`, sorted by name.
///
/// A character that cannot be loaded is reported and skipped. Characters with a
/// `testingOnly: true` header are skipped unless the configuration enables testing mode.
#[instrument(skip(config, registry))]
pub fn collect_agents(
    directory: impl AsRef<Path> + std::fmt::Debug,
    config: &Configuration,
    registry: &StrategyRegistry,
) -> anyhow::Result<Vec<Arc<Agent>>> {
    let verbose = config.verbose;
    let directory = directory.as_ref();

    if !Path::is_dir(directory) {
        bail!("'{directory:?}' is not a valid directory");
    }

    const RED: &str = "\x1b[31m";
    const GREEN: &str = "\x1b[32m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    let files = character_files(directory)?;
    info!(character_files = ?files);

    let longest_name = files
        .iter()
        .filter_map(|path| path.file_stem())
        .fold(0, |acu, stem| acu.max(stem.len()))
        + 3; // at least 3 dots

    if verbose {
        println!("Loading characters...");
    }

    let mut agents = Vec::with_capacity(files.len());
    for path in files {
        let name = character_name(&path);
        if verbose {
            print!("Loading {name:·<longest_name$} ");
            let _ = std::io::stdout().flush(); // try to flush stdout
        }

        let agent = match load_character(&path, registry) {
            Ok(agent) => agent,
            Err(e) => {
                error!("could not load '{name}': {e:#}");
                if verbose {
                    println!("{RED}{e:#}{RESET}");
                }
                continue;
            }
        };

        if agent.metadata.testing_only() && !config.testing {
            warn!("'{name}' is testing only, skipped");
            if verbose {
                println!("{YELLOW}testing only{RESET}");
            }
            continue;
        }

        if verbose {
            println!("{GREEN}Ok{RESET}");
        }
        agents.push(Arc::new(agent));
    }

    Ok(agents)
}

fn character_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads one character file.
///
/// The robot is named after the file, its `strategy` header picks the behaviour from `registry`
/// and the text after the headers becomes the source posted to the server.
#[instrument(skip(registry))]
pub fn load_character(path: &Path, registry: &StrategyRegistry) -> anyhow::Result<Agent> {
    let name = character_name(path);
    if name.is_empty() {
        bail!("no character name in {path:?}");
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("could not read {path:?}"))?;
    parse_character(&name, &text, registry)
}

/// Builds a robot from the text of its character file.
pub fn parse_character(
    name: &str,
    text: &str,
    registry: &StrategyRegistry,
) -> anyhow::Result<Agent> {
    let (metadata, body) = split_character(text);
    let Some(strategy_name) = metadata.get("strategy") else {
        bail!("missing '// strategy: ...' header");
    };
    let Some(strategy) = registry.get(strategy_name) else {
        bail!("unknown strategy '{strategy_name}'");
    };
    let body = body.to_owned();
    Ok(Agent::new(name, metadata, strategy).with_source(body))
}

/// Paths of the character files of `directory`, sorted.
pub fn character_files(directory: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(directory)
        .with_context(|| format!("could not read '{directory:?}'"))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == CHARACTER_EXTENSION))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod collector_tests {
    use super::*;

    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, text: &str) {
        std::fs::write(dir.path().join(file), text).unwrap();
    }

    #[test]
    fn test_parse_character() {
        let registry = StrategyRegistry::builtin();
        let agent = parse_character(
            "steve",
            "// name: Steve\n// strategy: always-defect\n\nSteve is mean.\n",
            &registry,
        )
        .unwrap();
        assert_eq!(agent.name, "steve");
        assert_eq!(agent.metadata.display_name(), Some("Steve"));
        assert_eq!(agent.source, "Steve is mean.\n");

        let missing = parse_character("x", "// name: X\n", &registry).unwrap_err();
        assert!(missing.to_string().contains("strategy"));
        let unknown = parse_character("x", "// strategy: chess\n", &registry).unwrap_err();
        assert!(unknown.to_string().contains("chess"));
    }

    #[test]
    fn test_collect_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "walter.robot", "// strategy: tit-for-tat\n");
        write(&dir, "greg.robot", "// strategy: always-cooperate\n");
        write(&dir, "froggy.robot", "// strategy: think:5\n// testingOnly: true\n");
        write(&dir, "broken.robot", "// name: Broken\n");
        write(&dir, "notes.txt", "// strategy: always-defect\n");

        let registry = StrategyRegistry::builtin();
        let config = Configuration::new().with_verbose(false);
        let agents = collect_agents(dir.path(), &config, &registry).unwrap();
        let names = agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["greg", "walter"]);

        let config = config.with_testing(true);
        let agents = collect_agents(dir.path(), &config, &registry).unwrap();
        let names = agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["froggy", "greg", "walter"]);

        assert_eq!(character_files(dir.path()).unwrap().len(), 4);
    }

    #[test]
    fn test_collect_rejects_missing_directory() {
        let registry = StrategyRegistry::builtin();
        let config = Configuration::new().with_verbose(false);
        assert!(collect_agents("/definitely/not/here", &config, &registry).is_err());
    }
}
