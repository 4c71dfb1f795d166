//! # Main: CLI Entry Point
//!
//! Terminal front end for the task dashboard state core. Each subcommand drives
//! one view-model against the backend and prints the result.
//!
//! ## Subcommands
//!
//! - `tasks`: one page of the task table, with filters, search, topic
//!   drill-down, paging and sorting.
//! - `add-event` / `remove-event` / `flag`: optimistic edits on one task,
//!   waiting for the backend to confirm or reject.
//! - `events`: the project's event catalog and the event names seen on tasks.
//! - `topic`: a topic's metadata and its tasks.
//! - `users`: per-user aggregates.
//! - `config init`: write a starter config file.
//!
//! ## Global Options
//!
//! - `--server` / `TASKLENS_SERVER`: backend base URL.
//! - `--token` / `TASKLENS_TOKEN`: bearer token. Without one, nothing is sent.
//! - `--project` / `TASKLENS_PROJECT`: selected project id.
//! - `--config`: config file path (default `~/.tasklens/config.toml`).
//! - `--json`: machine-readable output on stdout.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "tasklens", about = "Browse, filter and annotate conversational-analytics tasks")]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, env = "TASKLENS_SERVER", global = true)]
    server: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long, env = "TASKLENS_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Selected project id
    #[arg(long, env = "TASKLENS_PROJECT", global = true)]
    project: Option<String>,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List one page of the project's tasks
    Tasks {
        /// Only tasks carrying this event (repeatable; any match)
        #[arg(long = "event")]
        events: Vec<String>,
        /// Only tasks with this human flag (success or failure)
        #[arg(long)]
        flag: Option<String>,
        /// Only tasks whose last evaluation came from this source
        #[arg(long)]
        last_eval_source: Option<String>,
        /// Only tasks with this sentiment label
        #[arg(long)]
        sentiment: Option<String>,
        /// Created at or after (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        since: Option<String>,
        /// Created at or before (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        until: Option<String>,
        /// Free-text search; restricts the table to matching tasks
        #[arg(long, conflicts_with = "topic")]
        search: Option<String>,
        /// Restrict the table to the tasks of this topic
        #[arg(long)]
        topic: Option<String>,
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Rows per page (defaults to the config value)
        #[arg(long)]
        page_size: Option<u32>,
        /// Sort column: `col`, `col:asc`, `col:desc` or `-col` (repeatable)
        #[arg(long = "sort")]
        sort: Vec<String>,
    },
    /// Attach an event to a task
    AddEvent {
        /// Task id
        #[arg(long)]
        task: String,
        /// Event name
        #[arg(long)]
        event: String,
    },
    /// Remove every event with this name from a task
    RemoveEvent {
        /// Task id
        #[arg(long)]
        task: String,
        /// Event name
        #[arg(long)]
        event: String,
    },
    /// Set the human flag on a task
    Flag {
        /// Task id
        #[arg(long)]
        task: String,
        /// success or failure
        #[arg(long)]
        value: String,
    },
    /// Show the project's event definitions and the events seen on tasks
    Events,
    /// Show a topic and the tasks it groups
    Topic {
        /// Topic id
        #[arg(long)]
        id: String,
    },
    /// Show per-user aggregates
    Users {
        /// Only users with this event
        #[arg(long)]
        event: Option<String>,
        /// Sort column, same syntax as `tasks --sort`
        #[arg(long)]
        sort: Option<String>,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with the current settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings
    Show,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise; RUST_LOG filters.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Config { action } => cli::run_config(&cli, action),
        Commands::Tasks { .. } => cli::run_tasks(&cli),
        Commands::AddEvent { task, event } => cli::run_add_event(&cli, task, event),
        Commands::RemoveEvent { task, event } => cli::run_remove_event(&cli, task, event),
        Commands::Flag { task, value } => cli::run_flag(&cli, task, value),
        Commands::Events => cli::run_events(&cli),
        Commands::Topic { id } => cli::run_topic(&cli, id),
        Commands::Users { event, sort } => cli::run_users(&cli, event.as_deref(), sort.as_deref()),
    }
}
