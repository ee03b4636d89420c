//! Headless mode for the Dilemma session core.
//!
//! A line-oriented driver for scripted or agent-played sessions:
//! - Lines starting with `#` are commands (status, edit, day, aftermath, quit)
//! - Any other line is a player decision and counts as one AI turn

use dilemma_core::{
    AftermathProvider, AllocationError, ConversationMeta, ConversationRegistry, CoreConfig, GameSession,
    PowerAllocation, PowerShare, PrefetchState, Provider, Scenario, SessionConfig, SessionId,
    SummaryPrefetchCoordinator, SupportTracks, Track,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Everything a headless run needs.
pub struct HeadlessOptions {
    pub scenario: Scenario,
    pub session_id: SessionId,
    pub provider: Provider,
    pub language: String,
    pub debug: bool,
}

/// Baselines for the built-in scenarios.
pub fn scenario_setup(
    scenario: Scenario,
) -> Result<(String, PowerAllocation, SupportTracks), AllocationError> {
    let (role, shares, support) = match scenario {
        Scenario::Athens => (
            "Strategos of Athens, 431 BCE",
            vec![
                PowerShare::new("assembly", "Assembly", 45),
                PowerShare::new("council", "Council of 500", 20),
                PowerShare::new("strategoi", "Strategoi", 20),
                PowerShare::new("aristocrats", "Aristocrats", 15),
            ],
            SupportTracks::new(60, 50, 70),
        ),
        Scenario::NorthAmerica => (
            "President of a North American federation",
            vec![
                PowerShare::new("executive", "Executive", 35),
                PowerShare::new("congress", "Congress", 30),
                PowerShare::new("courts", "Courts", 20),
                PowerShare::new("states", "States", 15),
            ],
            SupportTracks::new(50, 45, 65),
        ),
        Scenario::MarsColony => (
            "Governor of the Mars Colony",
            vec![
                PowerShare::new("governor", "Governor", 40),
                PowerShare::new("engineers", "Engineers' Guild", 35),
                PowerShare::new("earth", "Earth Authority", 25),
            ],
            SupportTracks::new(55, 40, 60),
        ),
    };

    Ok((role.to_string(), PowerAllocation::new(shares)?, support))
}

pub fn parse_scenario(s: &str) -> Option<Scenario> {
    match s.to_lowercase().as_str() {
        "athens" => Some(Scenario::Athens),
        "north-america" | "northamerica" | "north_america" => Some(Scenario::NorthAmerica),
        "mars" | "mars-colony" | "mars_colony" => Some(Scenario::MarsColony),
        _ => None,
    }
}

/// Exactly one integer delta per track, in `Track::ALL` order.
pub fn parse_day_deltas(args: &[&str]) -> Option<[(Track, i32); 3]> {
    let [people, counterpower, anchor] = args else {
        return None;
    };
    Some([
        (Track::People, people.parse().ok()?),
        (Track::Counterpower, counterpower.parse().ok()?),
        (Track::PersonalAnchor, anchor.parse().ok()?),
    ])
}

/// Run a session reading commands from stdin.
pub async fn run_headless(
    options: HeadlessOptions,
    core: CoreConfig,
    provider: Arc<dyn AftermathProvider>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (role, allocation, support) = scenario_setup(options.scenario)?;
    let config = SessionConfig::new(role)
        .with_language(options.language)
        .with_debug(options.debug);
    let total_days = config.total_days;
    let mut session = GameSession::new(options.session_id, config, allocation, support, &core);

    let registry = ConversationRegistry::new(&core);
    let _sweeper = registry.spawn_sweeper();
    let prefetch = SummaryPrefetchCoordinator::new(provider, core.request_timeout, Handle::current());
    info!(session_id = %session.id(), scenario = ?options.scenario, "session started");

    println!("=== Dilemma Headless Mode ===");
    println!("Role: {}", session.config().role);
    println!("Session: {}", session.id());
    print_status(&session, &registry, &prefetch);
    println!();
    print_help();
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(command) = line.strip_prefix('#') else {
            // A decision: one AI turn on this session's conversation.
            if registry.get(session.id()).is_some() {
                registry.touch(session.id());
            } else {
                registry.store(
                    session.id().clone(),
                    format!("local-{}", session.id()),
                    options.provider,
                    ConversationMeta::Predefined {
                        scenario: options.scenario,
                        total_days,
                    },
                );
            }
            let turns = registry.get(session.id()).map(|r| r.turn_count).unwrap_or(0);
            println!("[DECISION] Day {}: {line} (turn {turns})", session.day());
            stdout.flush()?;
            continue;
        };

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.first().copied() {
            Some("quit") | Some("exit") => {
                registry.remove(session.id());
                prefetch.clear(session.id());
                println!("Goodbye!");
                break;
            }
            Some("status") => print_status(&session, &registry, &prefetch),
            Some("edit") => {
                let parsed = (
                    parts.get(1).and_then(|s| s.parse::<usize>().ok()),
                    parts.get(2).and_then(|s| s.parse::<f64>().ok()),
                );
                match parsed {
                    (Some(index), Some(percent)) => match session.edit_share(index, percent) {
                        Ok(()) => print_power(&session),
                        Err(e) => println!("[ERROR] {e}"),
                    },
                    _ => println!("[ERROR] Usage: #edit <index> <percent>"),
                }
            }
            Some("rename") => match (parts.get(1).and_then(|s| s.parse::<usize>().ok()), parts.get(2..)) {
                (Some(index), Some(words)) if !words.is_empty() => {
                    match session.rename_share(index, words.join(" ")) {
                        Ok(()) => print_power(&session),
                        Err(e) => println!("[ERROR] {e}"),
                    }
                }
                _ => println!("[ERROR] Usage: #rename <index> <label>"),
            },
            Some("reset") => match session.reset_allocation() {
                Ok(()) => print_power(&session),
                Err(e) => println!("[ERROR] {e}"),
            },
            Some("day") => match parse_day_deltas(&parts[1..]) {
                None => println!("[ERROR] Usage: #day <people> <counterpower> <anchor>"),
                Some(changes) => match session.end_day(&changes) {
                    Ok(phase) => {
                        println!("[DAY] {phase:?}");
                        if phase.is_terminal() {
                            // Start building the aftermath while the player reads.
                            prefetch.start(session.aftermath_request());
                        }
                    }
                    Err(e) => println!("[ERROR] {e}"),
                },
            },
            Some("aftermath") => {
                print!("[PROCESSING]");
                stdout.flush()?;
                let handle = prefetch.start(session.aftermath_request());
                let outcome = handle.outcome().await;
                print!("\r            \r");
                match outcome {
                    Ok(aftermath) => {
                        println!("[AFTERMATH] attempt {}", handle.attempt());
                        match serde_json::to_string_pretty(&aftermath.narrative) {
                            Ok(text) => println!("{text}"),
                            Err(e) => println!("[ERROR] {e}"),
                        }
                    }
                    Err(e) => println!("[ERROR] {e} (type #aftermath to retry)"),
                }
            }
            Some("help") => print_help(),
            _ => println!("[ERROR] Unknown command. Type #help for help."),
        }
        stdout.flush()?;
    }

    Ok(())
}

fn print_status(
    session: &GameSession,
    registry: &ConversationRegistry,
    prefetch: &SummaryPrefetchCoordinator,
) {
    let support = session.support();
    println!("[STATUS]");
    println!("  Day: {}/{}", session.day(), session.config().total_days);
    println!("  Phase: {:?}", session.phase());
    println!(
        "  Support: people {}, counterpower {}, anchor {}",
        support.people, support.counterpower, support.personal_anchor
    );
    print_power(session);

    let stats = registry.stats();
    println!("  Conversations: {} held", stats.total);
    if let Some(record) = registry.get(session.id()) {
        println!(
            "  This session: {} via {} ({} turns)",
            record.provider_conversation_id, record.provider, record.turn_count
        );
    }
    match prefetch.state(session.id()) {
        PrefetchState::Idle => {}
        state => println!("  Aftermath: {state:?}"),
    }
}

fn print_power(session: &GameSession) {
    let shares: Vec<String> = session
        .displayed_shares()
        .iter()
        .map(|s| format!("{} {}%", s.label, s.percent))
        .collect();
    println!("  Power: {}", shares.join(", "));
}

fn print_help() {
    println!("[HELP]");
    println!("  #status                  - Show the session");
    println!("  #edit <index> <percent>  - Set one faction's share");
    println!("  #rename <index> <label>  - Rename a faction");
    println!("  #reset                   - Restore the starting allocation");
    println!("  #day <p> <c> <a>         - End the day with support deltas");
    println!("  #aftermath               - Build (or show) the aftermath");
    println!("  #quit                    - Exit");
    println!("  (anything else is a decision)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenarios_are_valid() {
        for scenario in [Scenario::Athens, Scenario::NorthAmerica, Scenario::MarsColony] {
            let (role, allocation, support) = scenario_setup(scenario).unwrap();
            assert!(!role.is_empty());
            assert_eq!(allocation.total(), 100);
            assert!(allocation.len() > 1);
            assert!(!support.is_collapsed(CoreConfig::default().collapse_threshold));
        }
    }

    #[test]
    fn test_parse_day_deltas_is_strict() {
        assert_eq!(
            parse_day_deltas(&["5", "-3", "2"]),
            Some([(Track::People, 5), (Track::Counterpower, -3), (Track::PersonalAnchor, 2)])
        );
        assert_eq!(parse_day_deltas(&["5", "x", "-3", "2"]), None);
        assert_eq!(parse_day_deltas(&["5", "-3"]), None);
        assert_eq!(parse_day_deltas(&["5", "-3", "2", "1"]), None);
    }

    #[test]
    fn test_parse_scenario() {
        assert_eq!(parse_scenario("Athens"), Some(Scenario::Athens));
        assert_eq!(parse_scenario("mars-colony"), Some(Scenario::MarsColony));
        assert_eq!(parse_scenario("atlantis"), None);
    }
}
