//! CLI entry point for the CPAS structured memory store.
//!
//! This binary provides the `cpas-memory` command with subcommands for
//! inspecting the store, logging events, and managing state.

mod cli;
mod commands;
mod config;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cpas_memory::{StoreLocation, StructuredStore};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::EventFilters;
use crate::config::MemoryConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = MemoryConfig::load(&cli.config)?.apply_env(|name| std::env::var(name).ok());
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }

    init_tracing(&config.log_level);
    debug!(?config, "configuration loaded");

    let store = open_store(&config)?;
    let mut out = io::stdout().lock();

    let result = match &cli.command {
        Commands::Status => commands::status(&store, &mut out),
        Commands::Log {
            event_type,
            source,
            details,
            correlation,
            timestamp,
        } => commands::log(
            &store,
            &mut out,
            event_type,
            source,
            details.as_deref(),
            correlation.as_deref(),
            timestamp.as_deref(),
        ),
        Commands::Events {
            event_type,
            source,
            correlation,
            since,
            until,
            limit,
            asc,
            json,
        } => {
            let filters = EventFilters {
                event_type: event_type.as_deref(),
                source: source.as_deref(),
                correlation: correlation.as_deref(),
                since: since.as_deref(),
                until: until.as_deref(),
                limit: *limit,
                ascending: *asc,
            };
            commands::events(&store, &mut out, &filters, *json)
        }
        Commands::State { action } => commands::state(&store, &mut out, action),
    };

    store.close();
    result
}

/// Open the configured store, creating its data directory first.
fn open_store(config: &MemoryConfig) -> Result<StructuredStore> {
    let location = config.location();
    if let StoreLocation::File(path) = &location {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory {}", parent.display()))?;
        }
    }

    let store = StructuredStore::open_with(location, &config.store_options());
    if !store.is_ready() {
        error!(location = %store.location(), "structured store is degraded");
        bail!("structured store at {} is unavailable", store.location());
    }
    Ok(store)
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber on stderr with the given default level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}
