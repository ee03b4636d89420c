//! Dilemma headless driver.
//!
//! Plays one session of the political narrative game from stdin and builds
//! its aftermath through the backend (or a local mock):
//!
//! ```bash
//! cargo run -p dilemma -- --scenario athens --mock
//! ```

mod headless;

use clap::Parser;
use dilemma_core::{AftermathProvider, CoreConfig, MockProvider, Provider, SessionId};
use headless::{parse_scenario, HeadlessOptions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dilemma", about = "Play a Dilemma session headlessly")]
struct Args {
    /// Scenario to play: athens, north-america, mars-colony
    #[arg(long, default_value = "athens")]
    scenario: String,

    /// Session id (a random one by default)
    #[arg(long)]
    session: Option<String>,

    /// Provider recorded for this session's conversation
    #[arg(long, default_value = "openai")]
    provider: String,

    /// Aftermath language
    #[arg(long, default_value = "en")]
    language: String,

    /// Ask the backend for debug output
    #[arg(long)]
    debug: bool,

    /// Use a local mock instead of DILEMMA_API_URL
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let Some(scenario) = parse_scenario(&args.scenario) else {
        eprintln!("Error: unknown scenario {:?}.", args.scenario);
        eprintln!("Choose one of: athens, north-america, mars-colony");
        std::process::exit(2);
    };
    let provider_kind: Provider = args.provider.parse()?;
    let core = CoreConfig::from_env()?;

    let provider: Arc<dyn AftermathProvider> = if args.mock {
        Arc::new(MockProvider::new())
    } else {
        match dilemma_core::provider_from_env(&core) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!("Set DILEMMA_API_URL in .env or run with --mock.");
                std::process::exit(1);
            }
        }
    };

    let options = HeadlessOptions {
        scenario,
        session_id: args.session.map(SessionId::from).unwrap_or_else(SessionId::generate),
        provider: provider_kind,
        language: args.language,
        debug: args.debug,
    };

    headless::run_headless(options, core, provider).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
