mod app;
mod repl;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quiz_core::quiz::load_quiz_json;
use quiz_core::session::Locale;

use crate::app::{demo_quiz, Driver, Keep, Outcome};
use crate::repl::Command;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quiz Keep: resumable, encrypted quiz sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Settings file (JSON); defaults to settings.json in the data directory
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resume or start a session and read commands from stdin
    Run {
        #[command(flatten)]
        store: StoreArgs,
        /// Quiz content in the authoring JSON format; the demo quiz otherwise
        #[arg(long)]
        quiz: Option<PathBuf>,
        /// Start (or resume) a session in this locale right away
        #[arg(long)]
        locale: Option<Locale>,
    },
    /// Remove expired entries from the durable store
    Sweep {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Remove every stored entry in the namespace
    Reset {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print approximate storage usage
    Usage {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            store,
            quiz,
            locale,
        } => run_command(store, quiz, locale).await,
        Commands::Sweep { store } => {
            let keep = Keep::open(store.config.as_deref(), store.data_dir)?;
            let removed = keep.store.sweep_expired()?;
            println!("removed {removed} expired entries");
            Ok(())
        }
        Commands::Reset { store } => {
            let keep = Keep::open(store.config.as_deref(), store.data_dir)?;
            let removed = keep.adapter.reset()?;
            println!("cleared {removed} entries");
            Ok(())
        }
        Commands::Usage { store, json } => {
            let keep = Keep::open(store.config.as_deref(), store.data_dir)?;
            let usage = keep.store.usage()?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({"used": usage.used, "limit": usage.limit})
                );
            } else {
                println!("{} / {} bytes", usage.used, usage.limit);
            }
            Ok(())
        }
    }
}

async fn run_command(
    store: StoreArgs,
    quiz_path: Option<PathBuf>,
    locale: Option<Locale>,
) -> Result<()> {
    let keep = Keep::open(store.config.as_deref(), store.data_dir)?;
    let quiz = match quiz_path {
        Some(path) => load_quiz_json(&tokio::fs::read_to_string(&path).await?)?,
        None => demo_quiz()?,
    };

    let removed = keep.store.sweep_expired()?;
    if removed > 0 {
        info!(removed, "expired entries swept at startup");
    }

    let quiz_store = keep.quiz_store();
    let restored = keep.adapter.hydrate(&quiz_store).await;
    keep.adapter.gate().wait_ready().await;
    let writer = keep.adapter.attach(&quiz_store);
    let driver = Driver::new(quiz, quiz_store);

    if restored {
        println!("resumed saved session");
    }
    match locale {
        Some(locale) => {
            print_outcome(driver.execute(Command::Init(locale)));
        }
        None => println!("{}", driver.render()),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reported = None;
    while let Some(line) = lines.next_line().await? {
        let quit = match repl::parse(&line) {
            Ok(None) => false,
            Ok(Some(command)) => print_outcome(driver.execute(command)),
            Err(err) => {
                println!("error: {err}");
                false
            }
        };
        let failure = keep.adapter.last_error();
        if failure.is_some() && failure != reported {
            warn!("progress is not being saved");
            println!("warning: progress not saved: {}", failure.as_deref().unwrap_or_default());
        }
        reported = failure;
        if quit {
            break;
        }
    }

    keep.adapter.flush(driver.store()).await;
    if let Some(failure) = keep.adapter.last_error() {
        println!("warning: last write failed: {failure}");
    }
    drop(driver);
    writer.await?;
    Ok(())
}

/// Prints the outcome; `true` when the user asked to quit.
fn print_outcome(outcome: Result<Outcome>) -> bool {
    match outcome {
        Ok(Outcome::Print(text)) => {
            println!("{text}");
            false
        }
        Ok(Outcome::Quit) => true,
        Err(err) => {
            println!("error: {err:#}");
            false
        }
    }
}
