//! Live tasks: listing, cancellation and the per-task event stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use scyd_core::{DownloadEvent, TaskId, event_stream};
use serde_json::json;
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::task::{
    ActiveTaskListResponse, ActiveTaskResponse, CancelResponse, TaskEventSchema,
};
use crate::state::AppState;

pub const NO_ACTIVE_TASK: &str = "No active download with the given ID";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

type EventBody = BoxStream<'static, Result<Event, Infallible>>;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, cancel_task, task_events),
    components(schemas(
        ActiveTaskResponse,
        ActiveTaskListResponse,
        CancelResponse,
        TaskEventSchema
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .route("/tasks/{task_id}/events", get(task_events))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Tasks still running", body = ActiveTaskListResponse),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<ActiveTaskListResponse> {
    Json(ActiveTaskListResponse {
        tasks: state
            .orchestrator
            .active_tasks()
            .into_iter()
            .map(ActiveTaskResponse::from)
            .collect(),
    })
}

/// Ask a running download to stop. The terminal `error` event on the task's
/// stream confirms it.
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/cancel",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task id returned on submission")),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelResponse),
        (status = 401, description = "No valid session"),
        (status = 409, description = "No live task with that id"),
    )
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, ServerError> {
    let accepted = task_id
        .parse::<TaskId>()
        .is_ok_and(|id| state.orchestrator.cancel(&id));
    if !accepted {
        return Err(ServerError::Conflict(NO_ACTIVE_TASK.to_owned()));
    }
    Ok(Json(CancelResponse { status: "cancelling".to_owned() }))
}

/// Server-sent events for one task. The stream ends after the terminal
/// event; an unknown or finished task yields a single `not_found` event.
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/events",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task id returned on submission")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = TaskEventSchema),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn task_events(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let receiver = task_id
        .parse::<TaskId>()
        .ok()
        .and_then(|id| state.orchestrator.subscribe(&id));

    let body: EventBody = match receiver {
        Some(receiver) => event_stream(receiver)
            .map(|event| Ok::<_, Infallible>(to_sse(&event)))
            .boxed(),
        None => {
            debug!(%task_id, "event stream requested for unknown task");
            stream::once(async move { Ok::<_, Infallible>(not_found(&task_id)) }).boxed()
        }
    };

    Sse::new(body).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn to_sse(event: &DownloadEvent) -> Event {
    match Event::default().event(event.event.to_string()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!(error = %e, task_id = %event.task_id, "failed to encode task event");
            Event::default().comment("unencodable event")
        }
    }
}

fn not_found(task_id: &str) -> Event {
    let payload = json!({
        "event": "not_found",
        "task_id": task_id,
        "download_id": null,
        "data": NO_ACTIVE_TASK,
        "stream": null,
    });
    Event::default().event("not_found").data(payload.to_string())
}
