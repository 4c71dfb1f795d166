//! # Collection: Task Table View-Model
//!
//! Derives the backend queries for one task table from its
//! [`NavigationState`], fetches a page of tasks and the filtered task count,
//! and exposes the rows, the page count, and the tasks still missing a human
//! label.
//!
//! ## Lifecycle
//!
//! ```text
//! IDLE ──begin──> LOADING ──page ok──> READY ──begin──> LOADING
//!                    │                                     ▲
//!                    └──page failed──> ERROR ──begin───────┘
//! ```
//!
//! With no project selected (or no access token) nothing is fetched and the
//! view sits in IDLE with empty outputs.
//!
//! ## Stale-While-Revalidate
//!
//! Pages and counts are cached by their full parameter tuple
//! ([`TasksKey`] / [`CountKey`]). [`TaskCollection::begin`] immediately shows
//! the cached rows for the new key if there are any, otherwise it keeps the
//! rows already on screen until the response lands.
//!
//! Requests are never cancelled. Each carries a ticket with the key and the
//! generation it was issued under; a response is always filed in the cache
//! under its own key, but it only reaches the displayed rows when its key is
//! still the current one and nothing newer has been stored for that key.

use crate::cache::{SwrCache, DEFAULT_CACHE_CAPACITY};
use crate::client::{ApiClient, ClientError};
use crate::filters::{page_count, AggregateQuery, TasksQuery};
use crate::models::Task;
use crate::navigation::{CountKey, NavigationState, TasksKey};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ViewStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// Issued by [`TaskCollection::begin`] for the page request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageTicket {
    pub key: TasksKey,
    pub generation: u64,
}

/// Issued by [`TaskCollection::begin`] for the count request.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTicket {
    pub key: CountKey,
    pub generation: u64,
}

#[derive(Debug)]
pub struct TaskCollection {
    pages: SwrCache<TasksKey, Vec<Task>>,
    counts: SwrCache<CountKey, Option<u64>>,
    current_page: Option<(TasksKey, u64)>,
    current_count: Option<(CountKey, u64)>,
    next_generation: u64,
    rows: Vec<Task>,
    total: Option<u64>,
    page_size: u32,
    status: ViewStatus,
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl TaskCollection {
    pub fn new(cache_capacity: usize) -> Self {
        TaskCollection {
            pages: SwrCache::new(cache_capacity),
            counts: SwrCache::new(cache_capacity),
            current_page: None,
            current_count: None,
            next_generation: 0,
            rows: Vec::new(),
            total: None,
            page_size: crate::filters::DEFAULT_PAGE_SIZE,
            status: ViewStatus::Idle,
        }
    }

    // ── Outputs ─────────────────────────────────────────────────

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    /// Rows on screen. While LOADING these may belong to the previous key.
    pub fn tasks(&self) -> &[Task] {
        &self.rows
    }

    /// Rows whose latest label did not come from the project owner.
    pub fn tasks_missing_human_label(&self) -> Vec<&Task> {
        self.rows.iter().filter(|t| t.needs_human_label()).collect()
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn page_count(&self) -> u32 {
        page_count(self.total, self.page_size)
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.rows.iter().find(|t| t.id == task_id)
    }

    // ── Fetch protocol ──────────────────────────────────────────

    /// Start a fetch for the current navigation state.
    ///
    /// Returns `None` (and resets to IDLE with empty outputs) when no project
    /// is selected. Otherwise switches to LOADING, serves any cached data for
    /// the new keys, and returns the tickets the responses must be filed with.
    pub fn begin(&mut self, nav: &NavigationState) -> Option<(PageTicket, CountTicket)> {
        let (Some(page_key), Some(count_key)) = (nav.tasks_key(), nav.count_key()) else {
            self.reset();
            return None;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        self.page_size = page_key.pagination.page_size;

        if let Some(entry) = self.pages.get(&page_key) {
            debug!(age_ms = entry.age().as_millis() as u64, "serving cached page while revalidating");
            self.rows = entry.value.clone();
        }
        if let Some(entry) = self.counts.get(&count_key) {
            self.total = entry.value;
        }

        self.current_page = Some((page_key.clone(), generation));
        self.current_count = Some((count_key.clone(), generation));
        self.status = ViewStatus::Loading;

        Some((
            PageTicket {
                key: page_key,
                generation,
            },
            CountTicket {
                key: count_key,
                generation,
            },
        ))
    }

    /// File the page response for `ticket`.
    ///
    /// A failure only reaches the status when it answers the latest `begin`;
    /// a failure from an earlier request for the same key is dropped.
    pub fn complete_page(&mut self, ticket: PageTicket, result: Result<Vec<Task>, ClientError>) {
        let is_current = matches!(&self.current_page, Some((key, _)) if *key == ticket.key);
        let is_latest = matches!(
            &self.current_page,
            Some((key, generation)) if *key == ticket.key && ticket.generation >= *generation
        );
        match result {
            Ok(tasks) => {
                let stored = self.pages.insert(ticket.key.clone(), tasks, ticket.generation);
                if !is_current {
                    debug!(generation = ticket.generation, "page response for a superseded key; cached only");
                    return;
                }
                if !stored {
                    debug!(generation = ticket.generation, "older page response ignored");
                    return;
                }
                if let Some(entry) = self.pages.get(&ticket.key) {
                    self.rows = entry.value.clone();
                }
                self.status = ViewStatus::Ready;
                info!(
                    rows = self.rows.len(),
                    page = ticket.key.pagination.page_index,
                    "task page ready"
                );
            }
            Err(e) => {
                if !is_latest {
                    debug!(error = %e, generation = ticket.generation, "superseded page request failed");
                    return;
                }
                warn!(error = %e, "task page fetch failed");
                self.status = ViewStatus::Error(e.to_string());
            }
        }
    }

    /// File the count response for `ticket`. A failed count leaves the previous
    /// total in place; it does not put the view into ERROR.
    pub fn complete_count(&mut self, ticket: CountTicket, result: Result<Option<u64>, ClientError>) {
        let is_current = matches!(&self.current_count, Some((key, _)) if *key == ticket.key);
        let is_latest = matches!(
            &self.current_count,
            Some((key, generation)) if *key == ticket.key && ticket.generation >= *generation
        );
        match result {
            Ok(total) => {
                let stored = self.counts.insert(ticket.key, total, ticket.generation);
                if is_current && stored {
                    self.total = total;
                }
            }
            Err(e) => {
                if is_latest {
                    warn!(error = %e, "task count fetch failed");
                }
            }
        }
    }

    /// Begin, fetch page and count concurrently, and file both.
    ///
    /// Without a project or an access token nothing is sent and the view stays
    /// IDLE. Returns the page error, if any; the count error is only logged.
    pub async fn refresh(
        &mut self,
        client: &ApiClient,
        nav: &NavigationState,
    ) -> Result<(), ClientError> {
        if !client.has_token() {
            debug!("no access token; task fetch suppressed");
            self.reset();
            return Ok(());
        }
        let Some((page_ticket, count_ticket)) = self.begin(nav) else {
            return Ok(());
        };

        let project_id = page_ticket.key.project_id.clone();
        let page_query = TasksQuery::new(
            &page_ticket.key.filters,
            &page_ticket.key.pagination,
            &page_ticket.key.sorting,
        );
        let count_query = AggregateQuery::total_tasks(&count_ticket.key.filters);

        let (page, count) = tokio::join!(
            client.project_tasks(&project_id, &page_query),
            client.total_tasks(&project_id, &count_query),
        );

        let outcome = page.as_ref().map(|_| ()).map_err(Clone::clone);
        self.complete_page(page_ticket, page);
        self.complete_count(count_ticket, count);
        outcome
    }

    // ── Local edits ─────────────────────────────────────────────

    /// Replace a displayed task with a locally edited copy (optimistic
    /// mutation). The cached page for the current key is patched too, so
    /// revisiting it shows the edit. The next fetch supersedes both.
    pub fn replace_task(&mut self, task: Task) -> bool {
        let Some(row) = self.rows.iter_mut().find(|t| t.id == task.id) else {
            return false;
        };
        *row = task.clone();
        if let Some((key, _)) = &self.current_page {
            if let Some(entry) = self.pages.get_mut(key) {
                if let Some(cached) = entry.value.iter_mut().find(|t| t.id == task.id) {
                    *cached = task;
                }
            }
        }
        true
    }

    /// Mutable access to displayed rows, for reconciling mutation outcomes.
    pub fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.rows
    }

    /// Drop every cached page and count (e.g. after a project switch).
    pub fn invalidate(&mut self) {
        self.pages.clear();
        self.counts.clear();
    }

    fn reset(&mut self) {
        if self.status != ViewStatus::Idle {
            info!("no project selected; task table idle");
        }
        self.current_page = None;
        self.current_count = None;
        self.rows.clear();
        self.total = None;
        self.status = ViewStatus::Idle;
    }
}
