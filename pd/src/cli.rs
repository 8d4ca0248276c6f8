//! CLI command definitions and subcommands

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Pland - stage-gated daily planner with calendar sync
#[derive(Parser)]
#[command(
    name = "pland",
    about = "Build a daily plan through staged refinement and sync it to your calendar",
    after_help = "Logs are written to: ~/.local/share/pland/logs/pland.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run an interactive planning session
    Plan {
        /// Owner the session belongs to
        owner: String,

        /// Target date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a session's stage and current plan
    Status {
        owner: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List a session's sync transaction log
    Transactions {
        owner: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Undo a session's most recent sync transaction
    Undo {
        owner: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_command() {
        let cli = Cli::try_parse_from(["pland", "plan", "james", "--date", "2026-08-06"]).unwrap();
        match cli.command {
            Command::Plan { owner, date } => {
                assert_eq!(owner, "james");
                assert_eq!(date, Some(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()));
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_parse_undo_defaults_date() {
        let cli = Cli::try_parse_from(["pland", "undo", "james"]).unwrap();
        match cli.command {
            Command::Undo { owner, date } => {
                assert_eq!(owner, "james");
                assert!(date.is_none());
            }
            _ => panic!("expected undo command"),
        }
    }
}
