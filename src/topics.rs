//! Per-topic drill-down: load a topic and scope the task table to its tasks.

use crate::client::{ApiClient, ClientError};
use crate::models::Topic;
use crate::navigation::NavigationState;
use tracing::info;

/// Fetch `topic_id` for the selected project and make its task ids the
/// table's allowlist (replacing any search allowlist).
///
/// Returns `None` without a request when no project is selected.
pub async fn open_topic(
    client: &ApiClient,
    nav: &mut NavigationState,
    topic_id: &str,
) -> Result<Option<Topic>, ClientError> {
    let Some(project_id) = nav.project_id().map(str::to_string) else {
        return Ok(None);
    };
    client.require_token()?;
    let topic = client.topic(&project_id, topic_id).await?;
    info!(
        project_id = %project_id,
        topic = %topic.name,
        tasks = topic.tasks_ids.len(),
        "topic opened"
    );
    nav.set_id_allowlist(Some(topic.tasks_ids.clone()));
    Ok(Some(topic))
}
