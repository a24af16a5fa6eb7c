//! API handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::domain::{ManualTask, Participants, RequestContext, Task};
use crate::error::{Error, Result};

/// Header naming the caller's family
pub const FAMILY_HEADER: &str = "x-family";
/// Header naming the authenticated user
pub const USER_HEADER: &str = "x-user-id";

/// Created-task response
#[derive(Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub data: Task,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.clone(),
            data: task,
        }
    }
}

/// Response naming the task an operation touched
#[derive(Serialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
}

#[derive(Deserialize)]
pub struct NewTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub participants: Participants,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
}

#[derive(Deserialize)]
pub struct FamilyQuery {
    pub family: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Header family first, then the body/query family, then the user's membership
async fn context(state: &AppState, headers: &HeaderMap, family: Option<&str>) -> Result<RequestContext> {
    let family = header(headers, FAMILY_HEADER)
        .filter(|f| !f.trim().is_empty())
        .or(family);
    state.service.resolve_context(family, header(headers, USER_HEADER)).await
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()))
}

/// Ingest a natural-language task
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<TaskResponse>> {
    debug!("search: called");
    let request = body(payload)?;
    let text = request.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(Error::InvalidRequest("text is required".to_string()));
    }
    let ctx = context(&state, &headers, request.family.as_deref()).await?;
    let task = state.service.ingest(&ctx, &text).await?;
    Ok(Json(task.into()))
}

/// List the caller's tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FamilyQuery>,
) -> Result<Json<TasksResponse>> {
    debug!("list_tasks: called");
    let ctx = context(&state, &headers, query.family.as_deref()).await?;
    let tasks = state.service.list(&ctx).await?;
    Ok(Json(TasksResponse { tasks }))
}

/// Add a task by hand
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<NewTaskRequest>, JsonRejection>,
) -> Result<Json<TaskResponse>> {
    debug!("create_task: called");
    let request = body(payload)?;
    let ctx = context(&state, &headers, request.family.as_deref()).await?;
    let input = ManualTask {
        title: request.title,
        participants: request.participants,
        due: request.due,
    };
    let task = state.service.create_manual(&ctx, input).await?;
    Ok(Json(task.into()))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<FamilyQuery>,
) -> Result<Json<IdResponse>> {
    debug!(%id, "delete_task: called");
    let ctx = context(&state, &headers, query.family.as_deref()).await?;
    let task = state.service.delete(&ctx, &id).await?;
    Ok(Json(IdResponse { id: task.id }))
}

pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<FamilyQuery>,
) -> Result<Json<IdResponse>> {
    debug!(%id, "complete_task: called");
    let ctx = context(&state, &headers, query.family.as_deref()).await?;
    let task = state.service.complete(&ctx, &id).await?;
    Ok(Json(IdResponse { id: task.id }))
}

/// Live task list as Server-Sent Events, one `snapshot` event per change
pub async fn stream_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FamilyQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    debug!("stream_tasks: called");
    let ctx = context(&state, &headers, query.family.as_deref()).await?;
    let events = state.service.subscribe(&ctx).map(|snapshot| {
        let event = match snapshot {
            Ok(tasks) => Event::default()
                .event("snapshot")
                .json_data(json!({ "tasks": tasks }))
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok(event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn health() -> &'static str {
    "ok"
}
