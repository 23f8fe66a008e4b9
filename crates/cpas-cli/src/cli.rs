//! CLI argument definitions for `cpas-memory`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cpas-memory -- inspect and edit the CPAS structured memory store.
#[derive(Parser, Debug)]
#[command(
    name = "cpas-memory",
    version,
    about = "Inspect and edit the CPAS structured memory store",
    long_about = "Operator tool for the CPAS structured memory database: log events, \
                  query the event history, and manage key-value state."
)]
pub struct Cli {
    /// Database location. Overrides the config file and CPAS_MEMORY_DB.
    /// Use ":memory:" for a throwaway store.
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show store health, location, schema version, and row counts.
    Status,

    /// Append one event to the log.
    Log {
        /// Event type, e.g. USER_INPUT.
        #[arg(long = "type", short = 't')]
        event_type: String,

        /// Emitter of the event, e.g. Console.
        #[arg(long, short)]
        source: String,

        /// Structured payload as a JSON document.
        #[arg(long, short)]
        details: Option<String>,

        /// Correlation id grouping related events.
        #[arg(long, short)]
        correlation: Option<String>,

        /// Event time (RFC 3339). Without an offset it is taken as UTC.
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Query the event log.
    Events {
        /// Only events of this type.
        #[arg(long = "type", short = 't')]
        event_type: Option<String>,

        /// Only events from this source.
        #[arg(long, short)]
        source: Option<String>,

        /// Only events with this correlation id.
        #[arg(long, short)]
        correlation: Option<String>,

        /// Inclusive lower time bound (RFC 3339).
        #[arg(long)]
        since: Option<String>,

        /// Inclusive upper time bound (RFC 3339).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of events.
        #[arg(long, short)]
        limit: Option<usize>,

        /// Oldest first instead of newest first.
        #[arg(long)]
        asc: bool,

        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Manage key-value state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

/// Actions on the state table.
#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Print the value stored under a key.
    Get {
        key: String,
    },
    /// Store a JSON value under a key, replacing any previous value.
    Set {
        key: String,
        /// JSON document to store.
        value: String,
    },
    /// Remove a key.
    Delete {
        key: String,
    },
    /// List all keys.
    List,
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_event_filters() {
        let cli = Cli::try_parse_from([
            "cpas-memory",
            "events",
            "-t",
            "USER_INPUT",
            "--correlation",
            "c1",
            "--limit",
            "5",
            "--asc",
        ])
        .unwrap();

        match cli.command {
            Commands::Events {
                event_type,
                correlation,
                limit,
                asc,
                json,
                ..
            } => {
                assert_eq!(event_type.as_deref(), Some("USER_INPUT"));
                assert_eq!(correlation.as_deref(), Some("c1"));
                assert_eq!(limit, Some(5));
                assert!(asc);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_db_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["cpas-memory", "state", "get", "prefs", "--db", ":memory:"])
                .unwrap();
        assert_eq!(cli.db.as_deref(), Some(":memory:"));
        assert!(matches!(
            cli.command,
            Commands::State {
                action: StateAction::Get { .. }
            }
        ));
    }

    #[test]
    fn log_requires_type_and_source() {
        assert!(Cli::try_parse_from(["cpas-memory", "log", "--type", "X"]).is_err());
    }
}
