//! # Catalog: Project Event Definitions
//!
//! Read-only reference data fetched once per project: the event definitions
//! configured in the project settings, and the names of events actually seen
//! on the project's tasks.

use crate::client::{ApiClient, ClientError};
use crate::models::{Event, EventDefinition, Project, Task};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventCatalog {
    definitions: BTreeMap<String, EventDefinition>,
}

impl EventCatalog {
    pub fn new(definitions: BTreeMap<String, EventDefinition>) -> Self {
        EventCatalog { definitions }
    }

    pub fn from_project(project: &Project) -> Self {
        Self::new(project.settings.events.clone())
    }

    /// Fetch the project and build its catalog.
    pub async fn load(client: &ApiClient, project_id: &str) -> Result<Self, ClientError> {
        client.require_token()?;
        let project = client.project(project_id).await?;
        let catalog = Self::from_project(&project);
        info!(project_id, definitions = catalog.len(), "event catalog loaded");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, event_name: &str) -> Option<&EventDefinition> {
        self.definitions.get(event_name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &EventDefinition> {
        self.definitions.values()
    }

    /// Human-readable description of an event, when the catalog knows it.
    pub fn describe(&self, event: &Event) -> Option<&str> {
        self.get(&event.event_name)
            .map(|d| d.description.as_str())
            .filter(|d| !d.is_empty())
    }

    /// The definition for `event_name`, or one carrying only the name.
    pub fn definition_or_bare(&self, event_name: &str) -> EventDefinition {
        self.get(event_name)
            .cloned()
            .unwrap_or_else(|| EventDefinition::bare(event_name))
    }

    /// Definitions that could still be added to `task`, in name order.
    pub fn addable_to<'a>(&'a self, task: &Task) -> Vec<&'a EventDefinition> {
        self.definitions
            .iter()
            .filter(|(name, _)| !task.has_event(name))
            .map(|(_, definition)| definition)
            .collect()
    }
}

/// Distinct event names, sorted.
pub fn unique_event_names(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.event_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fetch the names of events seen on the project's tasks.
pub async fn load_unique_event_names(
    client: &ApiClient,
    project_id: &str,
) -> Result<Vec<String>, ClientError> {
    client.require_token()?;
    let events = client.unique_events(project_id).await?;
    Ok(unique_event_names(&events))
}
