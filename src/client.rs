//! # Client: Authenticated Backend HTTP Client
//!
//! Thin JSON client for the analytics backend. Every request carries
//! `Authorization: Bearer <token>` when a token is configured; POST bodies are
//! serialized as JSON.
//!
//! ## Endpoints
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | POST | `/api/projects/{project_id}/tasks` | [`crate::collection`] |
//! | POST | `/api/explore/{project_id}/aggregated/tasks` | [`crate::collection`] |
//! | POST | `/api/projects/{project_id}/search/tasks` | [`crate::search`] |
//! | POST | `/api/explore/{project_id}/topics/{topic_id}` | [`crate::topics`] |
//! | GET  | `/api/projects/{project_id}/unique-events` | [`crate::catalog`] |
//! | GET  | `/api/projects/{project_id}` | [`crate::catalog`] |
//! | POST | `/api/projects/{project_id}/users` | [`crate::users`] |
//! | GET  | `/api/tasks/{task_id}` | CLI |
//! | POST | `/api/tasks/{task_id}/add-event` | [`crate::mutation`] |
//! | POST | `/api/tasks/{task_id}/remove-event` | [`crate::mutation`] |
//! | POST | `/api/tasks/{task_id}/flag` | [`crate::mutation`] |
//!
//! ## Failure Model
//!
//! No retries: one failed request surfaces to the caller, and re-triggering is
//! the caller's job. 401/403 map to [`ClientError::Auth`], transport failures
//! (including timeouts) to [`ClientError::Network`], other non-2xx statuses to
//! [`ClientError::Status`], and unparseable bodies to [`ClientError::Decode`].
//! A request body that cannot be serialized is [`ClientError::Encode`] and is
//! never sent.

use crate::filters::{AggregateQuery, TasksQuery};
use crate::models::{Event, EventDefinition, Flag, Project, Task, Topic, UserMetadata, OWNER_SOURCE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("could not encode request body: {0}")]
    Encode(String),
}

impl ClientError {
    pub fn missing_token() -> Self {
        ClientError::Auth("no access token; request not sent".to_string())
    }
}

// ── Response envelopes ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Option<Vec<Task>>,
}

#[derive(Debug, Deserialize)]
struct TotalTasksResponse {
    #[serde(default)]
    total_nb_tasks: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    task_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Option<Vec<Event>>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Option<Vec<UserMetadata>>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Serialize)]
struct AddEventRequest<'a> {
    event: &'a EventDefinition,
}

#[derive(Serialize)]
struct RemoveEventRequest<'a> {
    event_name: &'a str,
}

#[derive(Serialize)]
struct FlagRequest<'a> {
    flag: Flag,
    source: &'a str,
}

// ── Client ──────────────────────────────────────────────────────

/// Cheap to clone: clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Error out before touching the network when no token is configured.
    pub fn require_token(&self) -> Result<(), ClientError> {
        if self.has_token() {
            Ok(())
        } else {
            Err(ClientError::missing_token())
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send one request and decode the JSON response.
    ///
    /// An empty 2xx body decodes as JSON `null`, so acknowledgement-only
    /// endpoints can be read as `serde_json::Value` or `Option<_>`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(%method, path, "backend request");

        let mut builder = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if method == Method::POST {
            builder = builder.json(body.unwrap_or(&Value::Null));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Auth(format!("HTTP {} from {}", status.as_u16(), path)));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes[..]
        };
        serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Encode(e.to_string()))?;
        self.request(Method::POST, path, Some(&body)).await
    }

    // ── Endpoints ───────────────────────────────────────────────

    /// One page of tasks with their events.
    pub async fn project_tasks(
        &self,
        project_id: &str,
        query: &TasksQuery,
    ) -> Result<Vec<Task>, ClientError> {
        let path = format!("/api/projects/{}/tasks", segment(project_id));
        let response: TasksResponse = self.post(&path, query).await?;
        Ok(response.tasks.unwrap_or_default())
    }

    /// Number of tasks matching the filters; `None` when the backend has no count.
    pub async fn total_tasks(
        &self,
        project_id: &str,
        query: &AggregateQuery,
    ) -> Result<Option<u64>, ClientError> {
        let path = format!("/api/explore/{}/aggregated/tasks", segment(project_id));
        let response: TotalTasksResponse = self.post(&path, query).await?;
        Ok(response.total_nb_tasks)
    }

    pub async fn search_tasks(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<String>, ClientError> {
        let path = format!("/api/projects/{}/search/tasks", segment(project_id));
        let response: SearchResponse = self.post(&path, &SearchRequest { query }).await?;
        Ok(response.task_ids.unwrap_or_default())
    }

    pub async fn topic(&self, project_id: &str, topic_id: &str) -> Result<Topic, ClientError> {
        let path = format!(
            "/api/explore/{}/topics/{}",
            segment(project_id),
            segment(topic_id)
        );
        self.request(Method::POST, &path, None).await
    }

    pub async fn unique_events(&self, project_id: &str) -> Result<Vec<Event>, ClientError> {
        let path = format!("/api/projects/{}/unique-events", segment(project_id));
        let response: EventsResponse = self.get(&path).await?;
        Ok(response.events.unwrap_or_default())
    }

    pub async fn project(&self, project_id: &str) -> Result<Project, ClientError> {
        self.get(&format!("/api/projects/{}", segment(project_id)))
            .await
    }

    pub async fn project_users(&self, project_id: &str) -> Result<Vec<UserMetadata>, ClientError> {
        let path = format!("/api/projects/{}/users", segment(project_id));
        let response: UsersResponse = self.request(Method::POST, &path, None).await?;
        Ok(response.users.unwrap_or_default())
    }

    pub async fn task(&self, task_id: &str) -> Result<Task, ClientError> {
        self.get(&format!("/api/tasks/{}", segment(task_id))).await
    }

    pub async fn add_event(
        &self,
        task_id: &str,
        definition: &EventDefinition,
    ) -> Result<(), ClientError> {
        let path = format!("/api/tasks/{}/add-event", segment(task_id));
        let _: Value = self
            .post(&path, &AddEventRequest { event: definition })
            .await?;
        Ok(())
    }

    pub async fn remove_event(&self, task_id: &str, event_name: &str) -> Result<(), ClientError> {
        let path = format!("/api/tasks/{}/remove-event", segment(task_id));
        let _: Value = self
            .post(&path, &RemoveEventRequest { event_name })
            .await?;
        Ok(())
    }

    /// Persist a human thumbs-up/down label.
    pub async fn flag_task(&self, task_id: &str, flag: Flag) -> Result<(), ClientError> {
        let path = format!("/api/tasks/{}/flag", segment(task_id));
        let _: Value = self
            .post(
                &path,
                &FlagRequest {
                    flag,
                    source: OWNER_SOURCE,
                },
            )
            .await?;
        Ok(())
    }
}

/// Percent-encode one path segment.
fn segment(raw: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(raw)
}
