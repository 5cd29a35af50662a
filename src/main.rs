use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use child_dialogue_sim::engine::catalog::EntitySummary;
use child_dialogue_sim::engine::offline::OfflineService;
use child_dialogue_sim::engine::prompt_builder::PromptBuilder;
use child_dialogue_sim::engine::protocol::{EngineCommand, EngineResponse};
use child_dialogue_sim::engine::resolver::resolve;
use child_dialogue_sim::engine::worker::Engine;
use child_dialogue_sim::model::message::DialogueTurn;
use child_dialogue_sim::{
    CatalogSource, DialogueSimulator, FallbackCatalog, FileCatalog, GenerativeService, LlmClient,
    Selector, Settings, SimulationError,
};

#[derive(Parser)]
#[command(
    name = "child-dialogue-sim",
    version,
    about = "Simulate a child's reply to a parent and grade the parent's words"
)]
struct Cli {
    /// Settings file (default: <config dir>/child-dialogue-sim/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog JSON with personalities and challenges (default: built-in data)
    #[arg(long, global = true, env = "CHILD_SIM_CATALOG")]
    catalog: Option<PathBuf>,

    /// Use canned local replies instead of the generative service
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation and print the result as JSON
    Simulate {
        /// Personality: name, `name:<name>` or `id:<id>`
        #[arg(short, long)]
        personality: String,
        /// Challenge: name, `name:<name>` or `id:<id>`
        #[arg(short, long)]
        challenge: String,
        /// What the parent says
        utterance: String,
    },
    /// Print both prompts without calling the service
    Prompt {
        #[arg(short, long)]
        personality: String,
        #[arg(short, long)]
        challenge: String,
        /// Child response to place in the evaluation prompt
        #[arg(long, default_value = "（孩子的回应）")]
        child_response: String,
        utterance: String,
    },
    /// List personalities
    Personalities,
    /// List challenges
    Challenges,
    /// List scenarios of one challenge
    Scenarios {
        #[arg(short, long)]
        challenge: String,
    },
    /// Read parent utterances from stdin, one per line
    Chat {
        #[arg(short, long)]
        personality: String,
        #[arg(short, long)]
        challenge: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let user_error = e
                .downcast_ref::<SimulationError>()
                .is_some_and(SimulationError::is_user_error);
            if user_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "child_dialogue_sim=debug"
    } else {
        "child_dialogue_sim=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if cli.catalog.is_some() {
        settings.catalog = cli.catalog.clone();
    }

    let source: Box<dyn CatalogSource> = match &settings.catalog {
        Some(path) => Box::new(FileCatalog::new(path)),
        None => Box::new(FallbackCatalog),
    };
    let catalog = source
        .load()
        .with_context(|| format!("loading catalog from {}", source.describe()))?;

    match cli.command {
        Command::Personalities => print_json(&catalog.personality_options()),
        Command::Challenges => print_json(&catalog.challenge_options()),
        Command::Scenarios { challenge } => {
            let challenge = resolve(catalog.challenges(), &Selector::parse(&challenge))?;
            let scenarios: Vec<EntitySummary> = catalog.scenarios_for_challenge(&challenge.id);
            print_json(&scenarios)
        }
        Command::Prompt {
            personality,
            challenge,
            child_response,
            utterance,
        } => {
            let personality = resolve(catalog.personalities(), &Selector::parse(&personality))?;
            let challenge = resolve(catalog.challenges(), &Selector::parse(&challenge))?;
            let turn = DialogueTurn {
                parent_utterance: utterance,
                child_response,
            };

            println!("=== generation ===");
            println!(
                "{}",
                PromptBuilder::build_generation(personality, challenge, &turn.parent_utterance)
            );
            println!();
            println!("=== evaluation ===");
            println!("{}", PromptBuilder::build_evaluation(personality, challenge, &turn));
            Ok(())
        }
        Command::Simulate {
            personality,
            challenge,
            utterance,
        } => {
            let service = build_service(cli.offline, &settings)?;
            let simulator = DialogueSimulator::new(catalog, service, settings.simulation);
            let result = simulator.simulate_dialogue(
                &utterance,
                &Selector::parse(&personality),
                &Selector::parse(&challenge),
            )?;
            print_json(&result)
        }
        Command::Chat {
            personality,
            challenge,
        } => {
            let simulator = Arc::new(DialogueSimulator::new(
                catalog,
                build_service(cli.offline, &settings)?,
                settings.simulation,
            ));
            chat(simulator, Selector::parse(&personality), Selector::parse(&challenge))
        }
    }
}

fn build_service(offline: bool, settings: &Settings) -> Result<Box<dyn GenerativeService>> {
    if offline {
        tracing::info!("Offline mode: replies are canned");
        return Ok(Box::new(OfflineService::new()));
    }
    let client = LlmClient::new(&settings.service).context("building service client")?;
    Ok(Box::new(client))
}

fn chat(
    simulator: Arc<DialogueSimulator<Box<dyn GenerativeService>>>,
    personality: Selector,
    challenge: Selector,
) -> Result<()> {
    let handle = Engine::spawn(simulator);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    write!(stdout, "parent> ")?;
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            write!(stdout, "parent> ")?;
            stdout.flush()?;
            continue;
        }

        handle
            .commands
            .send(EngineCommand::Simulate {
                parent_utterance: line,
                personality: personality.clone(),
                challenge: challenge.clone(),
            })
            .context("engine thread stopped")?;

        match handle.responses.recv().context("engine thread stopped")? {
            EngineResponse::Simulated(result) => {
                writeln!(stdout, "child> {}", result.child_response)?;
                writeln!(stdout, "{}", serde_json::to_string_pretty(&result.evaluation)?)?;
            }
            EngineResponse::Failed { status, message } => {
                writeln!(stdout, "[{status}] {message}")?;
                if (400..500).contains(&status) {
                    break;
                }
            }
        }

        write!(stdout, "parent> ")?;
        stdout.flush()?;
    }

    let _ = handle.commands.send(EngineCommand::Shutdown);
    let _ = handle.thread.join();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
