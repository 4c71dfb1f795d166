//! # Mutation: Optimistic Task Edits
//!
//! Adds and removes events on a task and sets its thumbs-up/down flag. Each
//! operation returns the edited task right away and sends the confirmation to
//! the backend in the background, so the edit shows before the round trip
//! finishes.
//!
//! ## Ledger
//!
//! Every edit gets a [`MutationId`] and a ledger entry holding what is needed
//! to undo it. Confirmations report back on a channel; [`TaskMutations::reconcile`]
//! (non-blocking) and [`TaskMutations::settle`] (waits for all) drain it:
//!
//! - confirmed: the entry is closed, nothing else changes;
//! - failed: the edit is rolled back on the task rows passed in, and the
//!   failure is reported and logged.
//!
//! A refetch replaces rows wholesale, so rollbacks are written to be harmless
//! on rows that no longer carry the edit.
//!
//! Confirmations are spawned with `tokio::spawn`: the operations must be
//! called from within a Tokio runtime.

use crate::catalog::EventCatalog;
use crate::client::{ApiClient, ClientError};
use crate::models::{Eval, Event, EventDefinition, Flag, Task, OWNER_SOURCE, PROVISIONAL_ID_PREFIX};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type MutationId = Uuid;

/// What an edit did, with enough detail to undo it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
    AddEvent {
        event_name: String,
        provisional_id: String,
    },
    RemoveEvent {
        event_name: String,
        removed: Vec<Event>,
    },
    SetFlag {
        flag: Flag,
        previous_flag: Option<Flag>,
        previous_eval: Option<Eval>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingMutation {
    pub id: MutationId,
    pub task_id: String,
    pub kind: MutationKind,
}

/// Outcome of one edit once its confirmation came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationReport {
    pub id: MutationId,
    pub task_id: String,
    pub kind: MutationKind,
    pub status: MutationStatus,
    /// True when a failed edit was undone on one of the rows passed in.
    pub rolled_back: bool,
}

pub struct TaskMutations {
    client: ApiClient,
    catalog: EventCatalog,
    pending: HashMap<MutationId, PendingMutation>,
    outcomes_tx: mpsc::UnboundedSender<(MutationId, Result<(), ClientError>)>,
    outcomes_rx: mpsc::UnboundedReceiver<(MutationId, Result<(), ClientError>)>,
}

impl TaskMutations {
    pub fn new(client: ApiClient, catalog: EventCatalog) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        TaskMutations {
            client,
            catalog,
            pending: HashMap::new(),
            outcomes_tx,
            outcomes_rx,
        }
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingMutation> {
        self.pending.values()
    }

    /// Status of an edit. Settled edits are no longer tracked and return `None`.
    pub fn status(&self, id: &MutationId) -> Option<MutationStatus> {
        self.pending.get(id).map(|_| MutationStatus::Pending)
    }

    // ── Operations ──────────────────────────────────────────────

    /// Attach `event_name` to `task` as an owner-sourced event.
    ///
    /// Returns the edited task and the id of the confirmation. A task that
    /// already carries the event comes back unchanged with no request sent.
    pub fn add_event(&mut self, task: &Task, event_name: &str) -> (Task, Option<MutationId>) {
        if task.has_event(event_name) {
            debug!(task_id = %task.id, event_name, "event already on task; nothing to add");
            return (task.clone(), None);
        }

        let id = Uuid::new_v4();
        let provisional_id = format!("{}{}", PROVISIONAL_ID_PREFIX, id);
        let mut edited = task.clone();
        edited.events.push(Event {
            id: provisional_id.clone(),
            task_id: Some(task.id.clone()),
            session_id: task.session_id.clone(),
            project_id: task.project_id.clone(),
            event_name: event_name.to_string(),
            source: OWNER_SOURCE.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        });

        let definition: EventDefinition = self.catalog.definition_or_bare(event_name);
        let client = self.client.clone();
        let task_id = task.id.clone();
        self.track(
            id,
            &task.id,
            MutationKind::AddEvent {
                event_name: event_name.to_string(),
                provisional_id,
            },
            async move { client.add_event(&task_id, &definition).await },
        );
        (edited, Some(id))
    }

    /// Drop every event named `event_name` from `task`.
    ///
    /// A task without such an event comes back unchanged with no request sent.
    pub fn remove_event(&mut self, task: &Task, event_name: &str) -> (Task, Option<MutationId>) {
        let (removed, kept): (Vec<Event>, Vec<Event>) = task
            .events
            .iter()
            .cloned()
            .partition(|e| e.event_name == event_name);
        if removed.is_empty() {
            debug!(task_id = %task.id, event_name, "event not on task; nothing to remove");
            return (task.clone(), None);
        }

        let mut edited = task.clone();
        edited.events = kept;

        let id = Uuid::new_v4();
        let client = self.client.clone();
        let task_id = task.id.clone();
        let name = event_name.to_string();
        self.track(
            id,
            &task.id,
            MutationKind::RemoveEvent {
                event_name: event_name.to_string(),
                removed,
            },
            async move { client.remove_event(&task_id, &name).await },
        );
        (edited, Some(id))
    }

    /// Label `task` with a human thumbs-up/down. The owner becomes the source
    /// of the latest eval, so the task no longer counts as missing a label.
    pub fn set_flag(&mut self, task: &Task, flag: Flag) -> (Task, MutationId) {
        let mut edited = task.clone();
        edited.flag = Some(flag);
        edited.last_eval = Some(Eval::by_owner(flag));

        let id = Uuid::new_v4();
        let client = self.client.clone();
        let task_id = task.id.clone();
        self.track(
            id,
            &task.id,
            MutationKind::SetFlag {
                flag,
                previous_flag: task.flag,
                previous_eval: task.last_eval.clone(),
            },
            async move { client.flag_task(&task_id, flag).await },
        );
        (edited, id)
    }

    fn track<F>(&mut self, id: MutationId, task_id: &str, kind: MutationKind, confirm: F)
    where
        F: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        info!(mutation = %id, task_id, kind = kind_name(&kind), "optimistic edit applied");
        self.pending.insert(
            id,
            PendingMutation {
                id,
                task_id: task_id.to_string(),
                kind,
            },
        );

        let tx = self.outcomes_tx.clone();
        if !self.client.has_token() {
            let _ = tx.send((id, Err(ClientError::missing_token())));
            return;
        }
        tokio::spawn(async move {
            let result = confirm.await;
            let _ = tx.send((id, result));
        });
    }

    // ── Reconciliation ──────────────────────────────────────────

    /// Apply every confirmation that has already arrived, without waiting.
    pub fn reconcile(&mut self, tasks: &mut [Task]) -> Vec<MutationReport> {
        let mut reports = Vec::new();
        while let Ok((id, result)) = self.outcomes_rx.try_recv() {
            if let Some(report) = self.apply_outcome(id, result, tasks) {
                reports.push(report);
            }
        }
        reports
    }

    /// Wait until every pending edit is confirmed or failed, then apply them.
    pub async fn settle(&mut self, tasks: &mut [Task]) -> Vec<MutationReport> {
        let mut reports = Vec::new();
        while !self.pending.is_empty() {
            let Some((id, result)) = self.outcomes_rx.recv().await else {
                break;
            };
            if let Some(report) = self.apply_outcome(id, result, tasks) {
                reports.push(report);
            }
        }
        reports
    }

    fn apply_outcome(
        &mut self,
        id: MutationId,
        result: Result<(), ClientError>,
        tasks: &mut [Task],
    ) -> Option<MutationReport> {
        let mutation = self.pending.remove(&id)?;
        match result {
            Ok(()) => {
                debug!(mutation = %id, task_id = %mutation.task_id, "edit confirmed");
                Some(MutationReport {
                    id,
                    task_id: mutation.task_id,
                    kind: mutation.kind,
                    status: MutationStatus::Confirmed,
                    rolled_back: false,
                })
            }
            Err(e) => {
                let rolled_back = tasks
                    .iter_mut()
                    .find(|t| t.id == mutation.task_id)
                    .is_some_and(|task| rollback(task, &mutation.kind));
                warn!(
                    mutation = %id,
                    task_id = %mutation.task_id,
                    kind = kind_name(&mutation.kind),
                    rolled_back,
                    error = %e,
                    "edit not confirmed by backend"
                );
                Some(MutationReport {
                    id,
                    task_id: mutation.task_id,
                    kind: mutation.kind,
                    status: MutationStatus::Failed(e.to_string()),
                    rolled_back,
                })
            }
        }
    }
}

fn kind_name(kind: &MutationKind) -> &'static str {
    match kind {
        MutationKind::AddEvent { .. } => "add_event",
        MutationKind::RemoveEvent { .. } => "remove_event",
        MutationKind::SetFlag { .. } => "set_flag",
    }
}

/// Undo `kind` on `task`. Returns whether anything changed.
///
/// - add: drop the provisional event, if still there;
/// - remove: put back removed events whose ids are not already present;
/// - flag: restore the previous flag and eval, unless the task now carries a
///   different flag (a later edit or a refetch owns it then).
pub fn rollback(task: &mut Task, kind: &MutationKind) -> bool {
    match kind {
        MutationKind::AddEvent { provisional_id, .. } => {
            let before = task.events.len();
            task.events.retain(|e| &e.id != provisional_id);
            task.events.len() != before
        }
        MutationKind::RemoveEvent { removed, .. } => {
            let mut restored = false;
            for event in removed {
                if !task.events.iter().any(|e| e.id == event.id) {
                    task.events.push(event.clone());
                    restored = true;
                }
            }
            restored
        }
        MutationKind::SetFlag {
            flag,
            previous_flag,
            previous_eval,
        } => {
            if task.flag != Some(*flag) {
                return false;
            }
            task.flag = *previous_flag;
            task.last_eval = previous_eval.clone();
            true
        }
    }
}
