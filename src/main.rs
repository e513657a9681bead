//! scenario - Dialog state machine tooling
//!
//! Checks and converts transitions files and replays scripted conversations
//! against an engine built from the configuration.

mod commands;
mod config;
mod replay;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use replay::Trail;
use scenario_core::{ConversationKey, MemoryLockStore, NameRewrite, ScenarioEngine};
use scenario_storage::create_history_store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scenario")]
#[command(about = "Dialog state machine tooling")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SCENARIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a transitions file and summarize it
    Check {
        /// Transitions file (.json, .yaml or .yml)
        transitions: PathBuf,

        /// Initial state; enables the reachability report
        #[arg(short, long)]
        initial: Option<String>,
    },

    /// Convert a transitions file between JSON and YAML
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// Prefix added to every state name
        #[arg(long)]
        states_prefix: Option<String>,

        /// Postfix added to every state name
        #[arg(long)]
        states_postfix: Option<String>,

        /// Prefix added to every handler name
        #[arg(long)]
        handlers_prefix: Option<String>,

        /// Postfix added to every handler name
        #[arg(long)]
        handlers_postfix: Option<String>,
    },

    /// Drive one conversation through a script
    Replay {
        /// Transitions file (.json, .yaml or .yml)
        transitions: PathBuf,

        /// Script file, one step per line
        script: PathBuf,

        /// Initial state
        #[arg(short, long)]
        initial: String,

        /// Chat id of the conversation
        #[arg(long, default_value_t = 1)]
        chat_id: i64,

        /// User id of the conversation (defaults to the chat id)
        #[arg(long)]
        user_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Check {
            transitions,
            initial,
        } => {
            let report = commands::check(&transitions, initial.as_deref())?;
            print!("{}", report.render(&transitions));
        }

        Commands::Convert {
            input,
            output,
            states_prefix,
            states_postfix,
            handlers_prefix,
            handlers_postfix,
        } => {
            let rewrite = NameRewrite {
                states_prefix,
                states_postfix,
                handlers_prefix,
                handlers_postfix,
            };
            let written = commands::convert(&input, &output, rewrite)?;
            println!(
                "{} {} source states to {}",
                "Wrote".green(),
                written,
                output.display()
            );
        }

        Commands::Replay {
            transitions,
            script,
            initial,
            chat_id,
            user_id,
        } => {
            let steps = replay::parse_script(&std::fs::read_to_string(&script)?)?;
            let key = ConversationKey::resolve(Some(chat_id), user_id)?;

            tracing::info!(
                "Replaying {} steps (lock_policy={}, storage={})",
                steps.len(),
                config.engine.lock_policy,
                config.storage.backend
            );
            let histories = create_history_store(&config.storage)?;
            let engine = ScenarioEngine::new(
                config.engine.clone(),
                histories,
                Arc::new(MemoryLockStore::new()),
            );

            let trail = Trail::default();
            commands::load_transitions(&engine, &transitions, Some(&initial), &trail)?;

            println!(
                "{}",
                format!("Conversation {}", key.to_string().cyan()).bold()
            );
            for report in replay::run_script(&engine, key, &steps, &trail).await? {
                print!("{}", commands::render_step(&report));
            }
        }
    }

    Ok(())
}
