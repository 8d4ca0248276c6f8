//! Pland - CLI entry point
//!
//! Runs interactive planning sessions and inspects persisted state. The
//! calendar remote wired here is the in-memory one; a real calendar
//! transport plugs into the same trait.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use pland::cli::{Cli, Command};
use pland::config::Config;
use pland::constraint::ConstraintStore;
use pland::error::TurnError;
use pland::orchestrator::{OrchestratorConfig, StageOrchestrator};
use pland::refine::RefinementLoop;
use pland::runner::Runner;
use pland::state::StateManager;
use pland::sync::{InMemoryCalendar, SyncEngine, UndoResult};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pland")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to a log file, not stdout; stdout belongs to the conversation
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("pland.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

fn resolve_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref())?;
    config.validate()?;

    let state = StateManager::spawn(config.store.resolve_path())?;
    let remote = Arc::new(InMemoryCalendar::new());

    match cli.command {
        Command::Plan { owner, date } => {
            let runner = Runner::spawn(state.clone());
            let constraints = ConstraintStore::new(state.clone(), runner);
            let refiner = RefinementLoop::rule_based();
            let sync = SyncEngine::new(remote.clone(), state.clone(), config.sync.create_concurrency);
            let orchestrator = StageOrchestrator::new(
                state.clone(),
                constraints,
                remote,
                refiner,
                sync,
                OrchestratorConfig {
                    max_refine_attempts: config.planning.max_refine_attempts,
                    default_buffer_minutes: config.planning.buffer_minutes,
                },
            );
            run_interactive(&orchestrator, &owner, resolve_date(date)).await?;
        }

        Command::Status { owner, date } => {
            show_status(&state, &owner, resolve_date(date)).await?;
        }

        Command::Transactions { owner, date } => {
            show_transactions(&state, &owner, resolve_date(date)).await?;
        }

        Command::Undo { owner, date } => {
            let sync = SyncEngine::new(remote, state.clone(), config.sync.create_concurrency);
            undo_last(&state, &sync, &owner, resolve_date(date)).await?;
        }
    }

    state.shutdown().await;
    Ok(())
}

/// Read turns from stdin until the user quits or the session leaves the
/// active state.
async fn run_interactive(orchestrator: &StageOrchestrator, owner: &str, date: NaiveDate) -> Result<()> {
    println!("Planning {} for {}. Type \"quit\" to exit, \"abandon\" to discard the session.", date, owner);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let Some(line) = stdin.lock().lines().next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        match orchestrator.handle_turn(owner, date, input).await {
            Ok(response) => {
                println!("\n{}\n", response.display_text);
                if !response.controls.is_empty() {
                    println!("[try: {}]", response.controls.join(" | "));
                }
            }
            Err(TurnError::SessionBusy { .. }) => {
                println!("Another turn is still running - try again in a moment.");
            }
            Err(e) => {
                println!("Turn failed: {}", e);
            }
        }
    }

    Ok(())
}

async fn show_status(state: &StateManager, owner: &str, date: NaiveDate) -> Result<()> {
    match state.get_session(owner, date).await? {
        None => println!("No session for {} on {}.", owner, date),
        Some(session) => {
            println!("Session {} - stage: {}, status: {}", session.id, session.stage, session.status);
            if let Some(plan) = &session.plan {
                println!("Plan:");
                for block in plan.sorted() {
                    println!(
                        "  {}-{}  {}",
                        block.start.format("%H:%M"),
                        block.end.format("%H:%M"),
                        block.label
                    );
                }
            }
        }
    }
    Ok(())
}

async fn show_transactions(state: &StateManager, owner: &str, date: NaiveDate) -> Result<()> {
    let session_id = pland::Session::key(owner, date);
    let transactions = state.list_transactions(&session_id).await?;
    if transactions.is_empty() {
        println!("No transactions for {}.", session_id);
        return Ok(());
    }
    for txn in transactions {
        let undone = if txn.is_undone() { " (undone)" } else { "" };
        println!("#{} {} - {} operation(s){}", txn.seq, txn.id, txn.operations.len(), undone);
    }
    Ok(())
}

async fn undo_last(state: &StateManager, sync: &SyncEngine, owner: &str, date: NaiveDate) -> Result<()> {
    let session_id = pland::Session::key(owner, date);
    let transactions = state.list_transactions(&session_id).await?;
    let Some(last) = transactions.iter().rev().find(|t| !t.is_undone()) else {
        println!("Nothing to undo for {}.", session_id);
        return Ok(());
    };

    match sync.undo(last).await? {
        UndoResult::Undone { operations } => {
            println!("Undid transaction #{} ({} operation(s)).", last.seq, operations);
        }
        UndoResult::AlreadyUndone => {
            println!("Transaction #{} was already undone.", last.seq);
        }
    }
    Ok(())
}
