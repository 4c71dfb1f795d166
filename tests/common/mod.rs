//! # Mock Backend: In-Process Analytics API for Tests
//!
//! A small axum server that speaks the subset of the backend API the client
//! uses. Tests configure its data and failure modes, point an [`ApiClient`]
//! at [`MockBackend::url`], and inspect [`MockBackend::requests`] afterwards.
//!
//! | Method | Path                                        | Route name     |
//! |--------|---------------------------------------------|----------------|
//! | POST   | `/api/projects/{project_id}/tasks`          | `tasks`        |
//! | POST   | `/api/explore/{project_id}/aggregated/tasks`| `count`        |
//! | POST   | `/api/projects/{project_id}/search/tasks`   | `search`       |
//! | POST   | `/api/explore/{project_id}/topics/{id}`     | `topic`        |
//! | GET    | `/api/projects/{project_id}/unique-events`  | `unique_events`|
//! | GET    | `/api/projects/{project_id}`                | `project`      |
//! | POST   | `/api/projects/{project_id}/users`          | `users`        |
//! | GET    | `/api/tasks/{task_id}`                      | `task`         |
//! | POST   | `/api/tasks/{task_id}/add-event`            | `add_event`    |
//! | POST   | `/api/tasks/{task_id}/remove-event`         | `remove_event` |
//! | POST   | `/api/tasks/{task_id}/flag`                 | `flag`         |
//!
//! Every request is recorded (route, path, JSON body, bearer token) before
//! auth and failure injection are applied.
//!
//! [`ApiClient`]: tasklens::ApiClient

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_TOKEN: &str = "test-token";
pub const PROJECT_ID: &str = "proj-1";

// ── Test data ───────────────────────────────────────────────────

/// A task as the backend would send it.
pub fn task_json(id: &str, flag: Option<&str>, eval_source: Option<&str>, events: &[&str]) -> Value {
    json!({
        "id": id,
        "project_id": PROJECT_ID,
        "session_id": format!("session-{}", id),
        "input": format!("input of {}", id),
        "output": format!("output of {}", id),
        "metadata": {"user_id": "alice"},
        "flag": flag,
        "last_eval": eval_source.map(|source| json!({"source": source, "value": flag})),
        "created_at": 1_700_000_000,
        "events": events.iter().enumerate().map(|(i, name)| event_json(&format!("{}-ev{}", id, i), id, name)).collect::<Vec<_>>(),
    })
}

pub fn event_json(id: &str, task_id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "task_id": task_id,
        "project_id": PROJECT_ID,
        "event_name": name,
        "source": "phospho",
        "created_at": 1_700_000_000,
    })
}

/// `count` tasks `t0..t{count}`, none labeled.
pub fn numbered_tasks(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| task_json(&format!("t{}", i), None, None, &[]))
        .collect()
}

// ── Recorded requests ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub route: &'static str,
    pub path: String,
    pub body: Value,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
enum Failure {
    Status(u16),
    Malformed,
}

#[derive(Debug)]
struct MockState {
    valid_token: String,
    tasks: Vec<Value>,
    /// Overrides the computed count; `Some(None)` answers with no count.
    total_override: Option<Option<u64>>,
    search_ids: Vec<String>,
    topics: HashMap<String, Value>,
    project: Value,
    unique_events: Vec<Value>,
    users: Vec<Value>,
    failures: HashMap<&'static str, Failure>,
    delays: HashMap<&'static str, Duration>,
    requests: Vec<RecordedRequest>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            valid_token: TEST_TOKEN.to_string(),
            tasks: Vec::new(),
            total_override: None,
            search_ids: Vec::new(),
            topics: HashMap::new(),
            project: json!({"id": PROJECT_ID, "project_name": "Demo", "settings": {"events": {}}}),
            unique_events: Vec::new(),
            users: Vec::new(),
            failures: HashMap::new(),
            delays: HashMap::new(),
            requests: Vec::new(),
        }
    }
}

type SharedState = Arc<Mutex<MockState>>;

// ── MockBackend ─────────────────────────────────────────────────

pub struct MockBackend {
    base_url: String,
    _abort_handle: tokio::task::AbortHandle,
    state: SharedState,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self._abort_handle.abort();
    }
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder {
            state: MockState::default(),
        }
    }

    pub fn url(&self) -> String {
        self.base_url.clone()
    }

    /// A client carrying the token the mock accepts.
    pub fn client(&self) -> tasklens::ApiClient {
        tasklens::ApiClient::new(&self.base_url, Some(TEST_TOKEN.to_string())).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, route: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route == route)
            .collect()
    }

    pub fn set_tasks(&self, tasks: Vec<Value>) {
        self.state.lock().unwrap().tasks = tasks;
    }

    pub fn set_failure(&self, route: &'static str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(route, Failure::Status(status));
    }

    pub fn clear_failure(&self, route: &'static str) {
        self.state.lock().unwrap().failures.remove(route);
    }
}

// ── Builder ─────────────────────────────────────────────────────

pub struct MockBackendBuilder {
    state: MockState,
}

impl MockBackendBuilder {
    pub fn with_tasks(mut self, tasks: Vec<Value>) -> Self {
        self.state.tasks = tasks;
        self
    }

    /// Answer the count endpoint with `total` instead of counting tasks.
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.state.total_override = Some(total);
        self
    }

    pub fn with_search_ids(mut self, ids: &[&str]) -> Self {
        self.state.search_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_topic(mut self, topic_id: &str, name: &str, task_ids: &[&str]) -> Self {
        self.state.topics.insert(
            topic_id.to_string(),
            json!({"name": name, "description": format!("about {}", name), "tasks_ids": task_ids}),
        );
        self
    }

    pub fn with_event_definitions(mut self, definitions: &[(&str, &str)]) -> Self {
        let events: serde_json::Map<String, Value> = definitions
            .iter()
            .map(|(name, description)| {
                (
                    name.to_string(),
                    json!({"event_name": name, "description": description}),
                )
            })
            .collect();
        self.state.project["settings"]["events"] = Value::Object(events);
        self
    }

    pub fn with_unique_events(mut self, events: Vec<Value>) -> Self {
        self.state.unique_events = events;
        self
    }

    pub fn with_users(mut self, users: Vec<Value>) -> Self {
        self.state.users = users;
        self
    }

    /// Answer `route` with the given HTTP status.
    pub fn with_failure(mut self, route: &'static str, status: u16) -> Self {
        self.state.failures.insert(route, Failure::Status(status));
        self
    }

    /// Answer `route` with 200 and a body that is not JSON.
    pub fn with_malformed(mut self, route: &'static str) -> Self {
        self.state.failures.insert(route, Failure::Malformed);
        self
    }

    pub fn with_delay(mut self, route: &'static str, delay: Duration) -> Self {
        self.state.delays.insert(route, delay);
        self
    }

    pub async fn start(self) -> MockBackend {
        let shared_state: SharedState = Arc::new(Mutex::new(self.state));

        let app = Router::new()
            .route("/api/projects/{project_id}", get(handle_project))
            .route("/api/projects/{project_id}/tasks", post(handle_tasks))
            .route("/api/projects/{project_id}/search/tasks", post(handle_search))
            .route("/api/projects/{project_id}/unique-events", get(handle_unique_events))
            .route("/api/projects/{project_id}/users", post(handle_users))
            .route("/api/explore/{project_id}/aggregated/tasks", post(handle_count))
            .route("/api/explore/{project_id}/topics/{topic_id}", post(handle_topic))
            .route("/api/tasks/{task_id}", get(handle_task))
            .route("/api/tasks/{task_id}/add-event", post(handle_add_event))
            .route("/api/tasks/{task_id}/remove-event", post(handle_remove_event))
            .route("/api/tasks/{task_id}/flag", post(handle_flag))
            .with_state(Arc::clone(&shared_state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend to random port");
        let addr: SocketAddr = listener
            .local_addr()
            .expect("Failed to get mock backend local address");
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock backend server failed");
        });

        MockBackend {
            base_url,
            _abort_handle: handle.abort_handle(),
            state: shared_state,
        }
    }
}

// ── Request gate ────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Record the request, then apply delay, auth and failure injection.
/// Returns the parsed body when the handler should answer normally.
async fn gate(
    state: &SharedState,
    route: &'static str,
    path: String,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Value, Response> {
    let body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let auth_token = bearer_token(headers);
    let (delay, failure, valid) = {
        let mut s = state.lock().unwrap();
        s.requests.push(RecordedRequest {
            route,
            path,
            body: body.clone(),
            auth_token: auth_token.clone(),
        });
        (
            s.delays.get(route).copied(),
            s.failures.get(route).cloned(),
            auth_token.as_deref() == Some(s.valid_token.as_str()),
        )
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if !valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid token"})),
        )
            .into_response());
    }
    match failure {
        Some(Failure::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Err((status, Json(json!({"detail": format!("Mock error {}", code)}))).into_response())
        }
        Some(Failure::Malformed) => Err((StatusCode::OK, "this is not json").into_response()),
        None => Ok(body),
    }
}

/// Tasks matching the filter fields the mock understands: `tasks_ids`,
/// `event_name` and `flag`.
fn matching_tasks(tasks: &[Value], filters: &Value) -> Vec<Value> {
    tasks
        .iter()
        .filter(|task| match filters["tasks_ids"].as_array() {
            Some(ids) => ids.iter().any(|id| id == &task["id"]),
            None => true,
        })
        .filter(|task| match filters["event_name"].as_array() {
            Some(names) => task["events"]
                .as_array()
                .map(|events| events.iter().any(|e| names.contains(&e["event_name"])))
                .unwrap_or(false),
            None => true,
        })
        .filter(|task| match filters.get("flag") {
            Some(flag) if !flag.is_null() => &task["flag"] == flag,
            _ => true,
        })
        .cloned()
        .collect()
}

// ── Route handlers ──────────────────────────────────────────────

async fn handle_tasks(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/projects/{}/tasks", project_id);
    let body = match gate(&state, "tasks", path, &headers, &body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let matching = matching_tasks(&state.lock().unwrap().tasks, &body["filters"]);
    let page = body["pagination"]["page"].as_u64().unwrap_or(0) as usize;
    let page_size = body["pagination"]["page_size"].as_u64().unwrap_or(10) as usize;
    let rows: Vec<Value> = matching
        .into_iter()
        .skip(page * page_size)
        .take(page_size)
        .collect();
    Json(json!({ "tasks": rows })).into_response()
}

async fn handle_count(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/explore/{}/aggregated/tasks", project_id);
    let body = match gate(&state, "count", path, &headers, &body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let s = state.lock().unwrap();
    let total = match s.total_override {
        Some(total) => total,
        None => Some(matching_tasks(&s.tasks, &body["tasks_filter"]).len() as u64),
    };
    Json(json!({ "total_nb_tasks": total })).into_response()
}

async fn handle_search(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/projects/{}/search/tasks", project_id);
    if let Err(response) = gate(&state, "search", path, &headers, &body).await {
        return response;
    }
    let ids = state.lock().unwrap().search_ids.clone();
    Json(json!({ "task_ids": ids })).into_response()
}

async fn handle_topic(
    State(state): State<SharedState>,
    Path((project_id, topic_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/explore/{}/topics/{}", project_id, topic_id);
    if let Err(response) = gate(&state, "topic", path, &headers, &body).await {
        return response;
    }
    match state.lock().unwrap().topics.get(&topic_id) {
        Some(topic) => Json(topic.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Topic not found"}))).into_response(),
    }
}

async fn handle_unique_events(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/api/projects/{}/unique-events", project_id);
    if let Err(response) = gate(&state, "unique_events", path, &headers, &[]).await {
        return response;
    }
    let events = state.lock().unwrap().unique_events.clone();
    Json(json!({ "events": events })).into_response()
}

async fn handle_project(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/api/projects/{}", project_id);
    if let Err(response) = gate(&state, "project", path, &headers, &[]).await {
        return response;
    }
    Json(state.lock().unwrap().project.clone()).into_response()
}

async fn handle_users(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/projects/{}/users", project_id);
    if let Err(response) = gate(&state, "users", path, &headers, &body).await {
        return response;
    }
    let users = state.lock().unwrap().users.clone();
    Json(json!({ "users": users })).into_response()
}

async fn handle_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/api/tasks/{}", task_id);
    if let Err(response) = gate(&state, "task", path, &headers, &[]).await {
        return response;
    }
    let s = state.lock().unwrap();
    match s.tasks.iter().find(|t| t["id"] == task_id.as_str()) {
        Some(task) => Json(task.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Task not found"}))).into_response(),
    }
}

async fn acknowledge(
    state: SharedState,
    route: &'static str,
    path: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match gate(&state, route, path, &headers, &body).await {
        Ok(_) => Json(json!({"status": "ok"})).into_response(),
        Err(response) => response,
    }
}

async fn handle_add_event(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/tasks/{}/add-event", task_id);
    acknowledge(state, "add_event", path, headers, body).await
}

async fn handle_remove_event(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/tasks/{}/remove-event", task_id);
    acknowledge(state, "remove_event", path, headers, body).await
}

async fn handle_flag(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/tasks/{}/flag", task_id);
    acknowledge(state, "flag", path, headers, body).await
}
