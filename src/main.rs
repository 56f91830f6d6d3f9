//! ripple CLI: explore the cascading consequences of an assertion.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use ripple::config::RippleConfig;
use ripple::impact::Phase;
use ripple::llm::{OllamaClient, OllamaConfig};
use ripple::session::Session;

#[derive(Parser)]
#[command(name = "ripple", version, about = "Consequence cascade engine")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ollama base URL (overrides config).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Model name (overrides config).
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full cascade: model, states, tensions, three phases, narrative.
    Run {
        /// The assertion to explore.
        assertion: String,

        /// Also run an advisory consolidation pass.
        #[arg(long)]
        consolidate: bool,

        /// Print the full session report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Build and print just the system model for an assertion.
    Model {
        /// The assertion to model.
        assertion: String,
    },

    /// Check that the backend is reachable and the model is available.
    Probe,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ripple=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RippleConfig::load(path)?,
        None => RippleConfig::default(),
    };
    if let Some(url) = cli.url {
        config.backend.base_url = url;
    }
    if let Some(model) = cli.model {
        config.backend.model = model;
    }

    match cli.command {
        Commands::Probe => {
            let mut client = OllamaClient::new(config.backend.clone());
            if !client.probe() {
                miette::bail!("Ollama is not reachable at {}", config.backend.base_url);
            }
            client.ensure_model()?;
            println!("backend ok: {} ({})", config.backend.base_url, client.model());
            Ok(())
        }

        Commands::Model { assertion } => {
            let client = connect(&config.backend)?;
            let session = Session::start(&client, &assertion)?;
            let json = serde_json::to_string_pretty(session.model()).into_diagnostic()?;
            println!("{json}");
            Ok(())
        }

        Commands::Run {
            assertion,
            consolidate,
            json,
        } => {
            let client = connect(&config.backend)?;
            let session = Session::run_cascade(&client, &assertion)?;

            let suggestions = if consolidate || config.consolidate {
                session.suggest_consolidations(&client)
            } else {
                Vec::new()
            };

            if json {
                let mut report = session.report();
                report["consolidationSuggestions"] =
                    serde_json::to_value(&suggestions).into_diagnostic()?;
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
                return Ok(());
            }

            print_session(&session);
            if !suggestions.is_empty() {
                println!("\nConsolidation suggestions:");
                for s in &suggestions {
                    println!(
                        "  merge {} -> \"{}\" ({:?}): {}",
                        s.original_impact_ids.join(" + "),
                        s.consolidated_impact.label,
                        s.confidence,
                        s.reasoning_for_consolidation
                    );
                }
            }
            Ok(())
        }
    }
}

fn connect(config: &OllamaConfig) -> Result<OllamaClient> {
    let mut client = OllamaClient::new(config.clone());
    if !client.probe() {
        miette::bail!(
            "Ollama is not reachable at {} (try `ripple probe`)",
            config.base_url
        );
    }
    client.ensure_model()?;
    Ok(client)
}

fn print_session(session: &Session) {
    println!("Assertion: {}\n", session.assertion());

    if let Some(summary) = session.initial_states_summary() {
        println!("Initial states: {summary}\n");
    }

    for phase in Phase::ALL {
        let impacts = session.impacts_for(phase);
        if impacts.is_empty() {
            continue;
        }
        println!("Order-{phase} impacts:");
        for impact in impacts {
            let lineage = impact
                .parent_id
                .as_deref()
                .map(|p| format!(" <- {p}"))
                .unwrap_or_default();
            println!(
                "  [{}] {} ({:?}){lineage}\n      {}",
                impact.id, impact.label, impact.validity, impact.description
            );
        }
        println!();
    }

    if !session.feedback_insights().is_empty() {
        println!("Feedback loops:");
        for insight in session.feedback_insights() {
            println!("  - {insight}");
        }
        println!();
    }

    if !session.states().is_empty() {
        println!("Final stock states:");
        for (name, state) in session.states() {
            println!("  {name}: {state}");
        }
        println!();
    }

    if let Some(narrative) = session.narrative() {
        println!("Narrative:\n{narrative}");
    }
}
