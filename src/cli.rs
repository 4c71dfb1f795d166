//! # CLI Execution Functions
//!
//! Execution logic for each subcommand, kept out of `main.rs`. Every runner
//! resolves the effective config, builds one [`ApiClient`], drives the
//! relevant view-model on a fresh tokio runtime and prints the outcome.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use tasklens::catalog::{self, EventCatalog};
use tasklens::collection::TaskCollection;
use tasklens::config::{self, Config};
use tasklens::filters::{DateRange, FilterSpec, SortKey};
use tasklens::models::{Flag, Task};
use tasklens::mutation::{MutationId, MutationReport, MutationStatus, TaskMutations};
use tasklens::navigation::NavigationState;
use tasklens::search::TaskSearch;
use tasklens::users::UserTable;
use tasklens::{topics, ApiClient};
use tracing::{info, warn};

use super::{Cli, Commands, ConfigAction};

// ── Shared setup ────────────────────────────────────────────────

fn config_file(cli: &Cli) -> Result<std::path::PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path(),
    }
}

/// File values overridden by flags and `TASKLENS_*` variables.
fn load_settings(cli: &Cli) -> Result<Config> {
    let path = config_file(cli)?;
    let settings = config::load_from(&path)?.with_overrides(
        cli.server.clone(),
        cli.token.clone(),
        cli.project.clone(),
    );
    settings.validate()?;
    Ok(settings)
}

fn build_client(settings: &Config) -> Result<ApiClient> {
    let client = ApiClient::with_timeout(
        &settings.server,
        settings.token.clone(),
        settings.request_timeout(),
    )?;
    if !client.has_token() {
        anyhow::bail!(
            "no access token configured (set --token, TASKLENS_TOKEN or `token` in the config file)"
        );
    }
    Ok(client)
}

fn require_project(settings: &Config) -> Result<String> {
    settings.project_id.clone().ok_or_else(|| {
        anyhow::anyhow!("no project selected (set --project, TASKLENS_PROJECT or `project_id`)")
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn event_list(task: &Task) -> String {
    let names: Vec<&str> = task.events.iter().map(|e| e.event_name.as_str()).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(",")
    }
}

fn print_task_rows(tasks: &[Task]) {
    println!(
        "{:<24} {:<8} {:<16} {:<24} {}",
        "ID", "FLAG", "CREATED", "EVENTS", "INPUT"
    );
    println!("{}", "-".repeat(100));
    for task in tasks {
        let flag = task.flag.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<8} {:<16} {:<24} {}",
            task.id,
            flag,
            format_timestamp(task.created_at),
            tasklens::snippet(&event_list(task), 24),
            tasklens::snippet(&task.input, 40)
        );
    }
}

// ── Tasks ───────────────────────────────────────────────────────

fn filters_from_args(
    events: &[String],
    flag: Option<&str>,
    last_eval_source: Option<&str>,
    sentiment: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<FilterSpec> {
    let flag = flag
        .map(str::parse::<Flag>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let start = since
        .map(|raw| tasklens::parse_date_bound(raw, false))
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let end = until
        .map(|raw| tasklens::parse_date_bound(raw, true))
        .transpose()
        .map_err(anyhow::Error::msg)?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            anyhow::bail!("--since must not be after --until");
        }
    }
    Ok(FilterSpec {
        event_names: Some(events.iter().cloned().collect::<BTreeSet<_>>()),
        flag,
        last_eval_source: last_eval_source.map(str::to_string),
        sentiment: sentiment.map(str::to_string),
        date_range: Some(DateRange { start, end }),
        id_allowlist: None,
    })
}

/// Handle `tasks`: build the navigation state from the flags, resolve any
/// search or topic into an allowlist, then fetch one page and the count.
pub fn run_tasks(cli: &Cli) -> Result<()> {
    let Commands::Tasks {
        events,
        flag,
        last_eval_source,
        sentiment,
        since,
        until,
        search,
        topic,
        page,
        page_size,
        sort,
    } = &cli.command
    else {
        anyhow::bail!("run_tasks called for another subcommand");
    };

    let settings = load_settings(cli)?;
    let project_id = require_project(&settings)?;
    let filters = filters_from_args(
        events,
        flag.as_deref(),
        last_eval_source.as_deref(),
        sentiment.as_deref(),
        since.as_deref(),
        until.as_deref(),
    )?;
    let sorting = sort
        .iter()
        .map(|raw| raw.parse::<SortKey>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;
    let client = build_client(&settings)?;

    let mut nav = NavigationState::for_project(&project_id);
    nav.set_page_size(page_size.unwrap_or(settings.page_size));
    nav.set_sorting(sorting);
    nav.set_filters(filters);

    let rt = tokio::runtime::Runtime::new()?;
    let mut collection = TaskCollection::new(settings.cache_capacity);
    rt.block_on(async {
        if let Some(query) = search {
            let mut task_search = TaskSearch::new();
            let ids = task_search
                .search(&client, &mut nav, query)
                .await
                .context("task search failed")?;
            info!(matches = ids.len(), "search applied");
            if ids.is_empty() {
                eprintln!("Search for '{}' matched no tasks; showing all tasks", query);
            }
        }
        if let Some(topic_id) = topic {
            let opened = topics::open_topic(&client, &mut nav, topic_id)
                .await
                .with_context(|| format!("loading topic '{}'", topic_id))?;
            if opened.is_some_and(|t| t.tasks_ids.is_empty()) {
                eprintln!("Topic '{}' has no tasks; showing all tasks", topic_id);
            }
        }
        nav.set_page_index(*page);
        collection
            .refresh(&client, &nav)
            .await
            .context("fetching tasks")?;
        anyhow::Ok(())
    })?;

    let missing: Vec<&str> = collection
        .tasks_missing_human_label()
        .into_iter()
        .map(|t| t.id.as_str())
        .collect();

    if cli.json {
        return print_json(&serde_json::json!({
            "project_id": project_id,
            "status": collection.status(),
            "page_index": nav.pagination().page_index,
            "page_size": nav.pagination().page_size,
            "page_count": collection.page_count(),
            "total": collection.total(),
            "tasks": collection.tasks(),
            "missing_human_label": missing,
        }));
    }

    if collection.tasks().is_empty() {
        eprintln!("No tasks found");
    } else {
        print_task_rows(collection.tasks());
    }
    let total = collection
        .total()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());
    eprintln!(
        "\nPage {} of {} ({} tasks)",
        nav.pagination().page_index.saturating_add(1),
        collection.page_count(),
        total
    );
    if !missing.is_empty() {
        eprintln!("{} task(s) on this page still need a human label", missing.len());
    }
    Ok(())
}

// ── Mutations ───────────────────────────────────────────────────

/// Fetch the task, apply `edit` optimistically, then wait for the backend.
/// Exits with an error when the edit was rejected (and rolled back).
fn run_mutation(
    cli: &Cli,
    task_id: &str,
    edit: impl FnOnce(&mut TaskMutations, &Task) -> (Task, Option<MutationId>),
) -> Result<()> {
    let settings = load_settings(cli)?;
    let client = build_client(&settings)?;

    let rt = tokio::runtime::Runtime::new()?;
    let (task, reports) = rt.block_on(async {
        let task = client
            .task(task_id)
            .await
            .with_context(|| format!("loading task '{}'", task_id))?;
        let catalog = match EventCatalog::load(&client, &task.project_id).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "event catalog unavailable; sending bare event names");
                EventCatalog::default()
            }
        };
        let mut mutations = TaskMutations::new(client.clone(), catalog);
        let (edited, id) = edit(&mut mutations, &task);
        if id.is_none() {
            info!(task_id, "nothing to change");
        }
        let mut rows = vec![edited];
        let reports = mutations.settle(&mut rows).await;
        let task = rows.into_iter().next().unwrap_or(task);
        anyhow::Ok((task, reports))
    })?;

    if cli.json {
        print_json(&serde_json::json!({ "task": task, "mutations": reports }))?;
    } else {
        for report in &reports {
            print_report(report);
        }
        let flag = task.flag.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{}: events [{}], flag {}", task.id, event_list(&task), flag);
        let badges: Vec<String> = task
            .metadata_badges()
            .into_iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        if !badges.is_empty() {
            println!("  {}", badges.join("  "));
        }
    }

    if let Some(failed) = reports.iter().find_map(|r| match &r.status {
        MutationStatus::Failed(e) => Some(e.clone()),
        _ => None,
    }) {
        anyhow::bail!("edit rejected by backend: {}", failed);
    }
    Ok(())
}

fn print_report(report: &MutationReport) {
    match &report.status {
        MutationStatus::Confirmed => eprintln!("Edit {} confirmed", report.id),
        MutationStatus::Failed(e) => eprintln!(
            "Edit {} failed: {}{}",
            report.id,
            e,
            if report.rolled_back { " (rolled back)" } else { "" }
        ),
        MutationStatus::Pending => eprintln!("Edit {} still pending", report.id),
    }
}

pub fn run_add_event(cli: &Cli, task_id: &str, event_name: &str) -> Result<()> {
    run_mutation(cli, task_id, |mutations, task| {
        mutations.add_event(task, event_name)
    })
}

pub fn run_remove_event(cli: &Cli, task_id: &str, event_name: &str) -> Result<()> {
    run_mutation(cli, task_id, |mutations, task| {
        mutations.remove_event(task, event_name)
    })
}

pub fn run_flag(cli: &Cli, task_id: &str, value: &str) -> Result<()> {
    let flag: Flag = value.parse().map_err(anyhow::Error::msg)?;
    run_mutation(cli, task_id, |mutations, task| {
        let (edited, id) = mutations.set_flag(task, flag);
        (edited, Some(id))
    })
}

// ── Reference data ──────────────────────────────────────────────

/// Handle `events`: configured definitions plus names seen on tasks.
pub fn run_events(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let project_id = require_project(&settings)?;
    let client = build_client(&settings)?;

    let rt = tokio::runtime::Runtime::new()?;
    let (catalog, seen) = rt.block_on(async {
        let (catalog, seen) = tokio::join!(
            EventCatalog::load(&client, &project_id),
            catalog::load_unique_event_names(&client, &project_id),
        );
        anyhow::Ok((
            catalog.context("loading project settings")?,
            seen.context("loading unique events")?,
        ))
    })?;

    if cli.json {
        let definitions: Vec<_> = catalog.definitions().collect();
        return print_json(&serde_json::json!({
            "definitions": definitions,
            "seen": seen,
        }));
    }

    if catalog.is_empty() {
        eprintln!("No event definitions configured");
    } else {
        println!("{:<24} {}", "EVENT", "DESCRIPTION");
        println!("{}", "-".repeat(72));
        for definition in catalog.definitions() {
            println!(
                "{:<24} {}",
                definition.event_name,
                tasklens::snippet(&definition.description, 48)
            );
        }
    }
    let seen = if seen.is_empty() {
        "-".to_string()
    } else {
        seen.join(", ")
    };
    eprintln!("\nSeen on tasks: {}", seen);
    Ok(())
}

/// Handle `topic`: its metadata and one page of its tasks.
pub fn run_topic(cli: &Cli, topic_id: &str) -> Result<()> {
    let settings = load_settings(cli)?;
    let project_id = require_project(&settings)?;
    let client = build_client(&settings)?;

    let mut nav = NavigationState::for_project(&project_id);
    nav.set_page_size(settings.page_size);
    let mut collection = TaskCollection::new(settings.cache_capacity);

    let rt = tokio::runtime::Runtime::new()?;
    let topic = rt.block_on(async {
        let topic = topics::open_topic(&client, &mut nav, topic_id)
            .await
            .with_context(|| format!("loading topic '{}'", topic_id))?;
        collection
            .refresh(&client, &nav)
            .await
            .context("fetching topic tasks")?;
        anyhow::Ok(topic)
    })?;
    let topic = topic.ok_or_else(|| anyhow::anyhow!("no project selected"))?;
    if topic.tasks_ids.is_empty() {
        eprintln!("Topic '{}' has no tasks; showing all tasks", topic_id);
    }

    if cli.json {
        return print_json(&serde_json::json!({
            "topic": topic,
            "tasks": collection.tasks(),
            "total": collection.total(),
        }));
    }

    eprintln!("Topic: {}", topic.name);
    if let Some(description) = topic.description.as_deref().filter(|d| !d.is_empty()) {
        eprintln!("  {}", description);
    }
    eprintln!("  Tasks: {}\n", topic.tasks_ids.len());
    print_task_rows(collection.tasks());
    Ok(())
}

/// Handle `users`: per-user aggregates, filtered and sorted locally.
pub fn run_users(cli: &Cli, event: Option<&str>, sort: Option<&str>) -> Result<()> {
    let settings = load_settings(cli)?;
    let project_id = require_project(&settings)?;
    let sort_key = sort
        .map(str::parse::<SortKey>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let client = build_client(&settings)?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut table = rt
        .block_on(UserTable::load(&client, &project_id))
        .context("loading user aggregates")?;
    table.set_event_filter(event.map(str::to_string));
    if let Some(key) = &sort_key {
        table.set_sort(key).map_err(anyhow::Error::msg)?;
    }
    let rows = table.rows();

    if cli.json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        eprintln!("No users found");
        return Ok(());
    }
    println!(
        "{:<24} {:>8} {:>10} {:>12} {:>10}",
        "USER", "TASKS", "SUCCESS", "SESSION LEN", "TOKENS"
    );
    println!("{}", "-".repeat(68));
    for user in rows {
        println!(
            "{:<24} {:>8} {:>10} {:>12} {:>10}",
            user.user_id,
            user.nb_tasks,
            user.avg_success_rate
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string()),
            user.avg_session_length
                .map(|l| format!("{:.1}", l))
                .unwrap_or_else(|| "-".to_string()),
            user.total_tokens
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

// ── Config ──────────────────────────────────────────────────────

pub fn run_config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    let path = config_file(cli)?;
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            let settings = config::load_from(&path)
                .unwrap_or_default()
                .with_overrides(cli.server.clone(), cli.token.clone(), cli.project.clone());
            settings.validate()?;
            config::save_to(&path, &settings)?;
            eprintln!("Config written to {}", path.display());
        }
        ConfigAction::Show => {
            let mut settings = load_settings(cli)?;
            if settings.token.is_some() {
                settings.token = Some("********".to_string());
            }
            if cli.json {
                return print_json(&settings);
            }
            eprintln!("Config file: {}", path.display());
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
