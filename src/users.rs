//! # Users: Per-User Aggregate Table
//!
//! The backend computes per-user aggregates (task count, success rate, session
//! length, token usage, events seen). The table itself is small, so filtering
//! by event and sorting by column happen client-side.

use crate::client::{ApiClient, ClientError};
use crate::filters::{SortDirection, SortKey};
use crate::models::UserMetadata;
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::info;

/// Sortable columns of the user table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserColumn {
    UserId,
    NbTasks,
    AvgSuccessRate,
    AvgSessionLength,
    TotalTokens,
}

impl FromStr for UserColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_id" => Ok(UserColumn::UserId),
            "nb_tasks" => Ok(UserColumn::NbTasks),
            "avg_success_rate" => Ok(UserColumn::AvgSuccessRate),
            "avg_session_length" => Ok(UserColumn::AvgSessionLength),
            "total_tokens" => Ok(UserColumn::TotalTokens),
            other => Err(format!("unknown user column '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserTable {
    users: Vec<UserMetadata>,
    event_filter: Option<String>,
    sort: Option<(UserColumn, SortDirection)>,
}

impl UserTable {
    pub fn new(users: Vec<UserMetadata>) -> Self {
        UserTable {
            users,
            ..Default::default()
        }
    }

    /// Fetch the aggregates for `project_id`.
    pub async fn load(client: &ApiClient, project_id: &str) -> Result<Self, ClientError> {
        client.require_token()?;
        let users = client.project_users(project_id).await?;
        info!(project_id, users = users.len(), "user aggregates loaded");
        Ok(Self::new(users))
    }

    /// Keep only users with at least one event named `event_name`; `None` clears.
    pub fn set_event_filter(&mut self, event_name: Option<String>) {
        self.event_filter = event_name.filter(|name| !name.is_empty());
    }

    pub fn set_sort(&mut self, key: &SortKey) -> Result<(), String> {
        let column: UserColumn = key.column_id.parse()?;
        self.sort = Some((column, key.direction));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Distinct event names across all users, sorted (the filter menu).
    pub fn event_names(&self) -> Vec<String> {
        let events: Vec<_> = self.users.iter().flat_map(|u| u.events.iter().cloned()).collect();
        crate::catalog::unique_event_names(&events)
    }

    /// Users after the event filter and sort.
    pub fn rows(&self) -> Vec<&UserMetadata> {
        let mut rows: Vec<&UserMetadata> = self
            .users
            .iter()
            .filter(|user| match &self.event_filter {
                Some(name) => user.events.iter().any(|e| &e.event_name == name),
                None => true,
            })
            .collect();
        if let Some((column, direction)) = self.sort {
            rows.sort_by(|a, b| {
                let ordering = compare(a, b, column);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }
        rows
    }
}

/// Missing values sort before present ones.
fn compare(a: &UserMetadata, b: &UserMetadata, column: UserColumn) -> Ordering {
    fn by_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
        match (a, b) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        }
    }
    match column {
        UserColumn::UserId => a.user_id.cmp(&b.user_id),
        UserColumn::NbTasks => a.nb_tasks.cmp(&b.nb_tasks),
        UserColumn::AvgSuccessRate => by_f64(a.avg_success_rate, b.avg_success_rate),
        UserColumn::AvgSessionLength => by_f64(a.avg_session_length, b.avg_session_length),
        UserColumn::TotalTokens => a.total_tokens.cmp(&b.total_tokens),
    }
}
