//! # Search: Free-Text Task Search
//!
//! Sends a free-text query to the backend's task search and folds the matching
//! ids into the navigation state as the table's id allowlist. Ranking is the
//! backend's business; only the id set is used, as a filter.

use crate::client::{ApiClient, ClientError};
use crate::navigation::NavigationState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Clears the loading flag when dropped, so a cancelled search does not leave
/// it set.
struct LoadingGuard(Arc<AtomicBool>);

impl LoadingGuard {
    fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Relaxed);
        LoadingGuard(Arc::clone(flag))
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct TaskSearch {
    loading: Arc<AtomicBool>,
    last_query: Option<String>,
}

impl TaskSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    /// Shared handle on the loading flag, for a renderer running elsewhere.
    pub fn loading_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.loading)
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Run `query` and restrict the table to the matching task ids, replacing
    /// any previous allowlist.
    ///
    /// A blank query clears the allowlist instead and sends nothing. With no
    /// project selected nothing happens. On failure the filters are left as
    /// they were.
    pub async fn search(
        &mut self,
        client: &ApiClient,
        nav: &mut NavigationState,
        query: &str,
    ) -> Result<Vec<String>, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            self.clear(nav);
            return Ok(Vec::new());
        }
        let Some(project_id) = nav.project_id().map(str::to_string) else {
            return Ok(Vec::new());
        };
        client.require_token()?;

        let guard = LoadingGuard::raise(&self.loading);
        let result = client.search_tasks(&project_id, query).await;
        drop(guard);

        let task_ids = result?;
        info!(project_id = %project_id, query, matches = task_ids.len(), "task search finished");
        self.last_query = Some(query.to_string());
        nav.set_id_allowlist(Some(task_ids.clone()));
        Ok(task_ids)
    }

    /// Drop the search allowlist.
    pub fn clear(&mut self, nav: &mut NavigationState) {
        self.last_query = None;
        nav.set_id_allowlist(None);
    }
}
