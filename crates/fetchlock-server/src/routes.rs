//! External task routes, on the default engine and on named engines.
//!
//! Every route authenticates before it looks at the body: the credential
//! header is parsed first, then the engine is resolved, then the password is
//! checked. Bodies are parsed by hand so a malformed body is answered with an
//! `InvalidRequestException` like any other validation failure.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug};

use fetchlock_core::app::{Authentication, Engine};
use fetchlock_core::domain::{FetchRequest, TaskId};
use fetchlock_core::observability::task_span;

use crate::AppState;
use crate::auth::basic_credentials;
use crate::dto::{CompleteTaskDto, ExtendLockDto, HandleFailureDto, LockedExternalTaskDto};
use crate::error::{ApiError, ApiResult};

/// Authenticated engine for a request; `engine_name` is `None` on default routes.
async fn resolve(
    state: &AppState,
    engine_name: Option<&str>,
    headers: &HeaderMap,
) -> ApiResult<(Arc<Engine>, Authentication)> {
    let default_engine = state.registry.default_engine();
    let realm = engine_name.unwrap_or(default_engine.name());

    let credentials = basic_credentials(headers).map_err(|err| {
        debug!(%err, "rejected credentials");
        ApiError::unauthorized(realm)
    })?;

    let engine = match engine_name {
        Some(name) => state
            .registry
            .get(name)
            .ok_or_else(|| ApiError::engine_not_found(name))?,
        None => Arc::clone(&default_engine),
    };

    let authentication = engine.authenticate(&credentials).await.map_err(|err| {
        debug!(%err, engine = engine.name(), "authentication failed");
        ApiError::unauthorized(realm)
    })?;
    Ok((engine, authentication))
}

fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_request(format!("Invalid request body: {e}")))
}

fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::task_not_found(format!("External task with id {raw} does not exist")))
}

async fn fetch_and_lock(
    state: &AppState,
    engine_name: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> ApiResult<Json<Vec<LockedExternalTaskDto>>> {
    let (engine, authentication) = resolve(state, engine_name, headers).await?;
    let request: FetchRequest = parse_body(body)?;

    let locked = engine
        .handler()
        .fetch_and_lock(&authentication, request)
        .await?;
    Ok(Json(locked.into_iter().map(LockedExternalTaskDto::from).collect()))
}

pub async fn fetch_default(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Vec<LockedExternalTaskDto>>> {
    fetch_and_lock(&state, None, &headers, &body).await
}

pub async fn fetch_named(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Vec<LockedExternalTaskDto>>> {
    fetch_and_lock(&state, Some(&engine), &headers, &body).await
}

/// Lifecycle operation on one task.
#[derive(Debug, Clone, Copy)]
enum TaskAction {
    Complete,
    Failure,
    Unlock,
    ExtendLock,
}

impl TaskAction {
    fn name(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failure => "failure",
            Self::Unlock => "unlock",
            Self::ExtendLock => "extendLock",
        }
    }
}

async fn task_action(
    state: &AppState,
    engine_name: Option<&str>,
    raw_id: &str,
    action: TaskAction,
    headers: &HeaderMap,
    body: &Bytes,
) -> ApiResult<StatusCode> {
    let (engine, _authentication) = resolve(state, engine_name, headers).await?;
    let id = parse_task_id(raw_id)?;
    let service = engine.service();

    let span = task_span(action.name(), engine.name(), raw_id);
    async {
        match action {
            TaskAction::Complete => {
                let dto: CompleteTaskDto = parse_body(body)?;
                service.complete(id, &dto.worker_id).await?;
            }
            TaskAction::Failure => {
                let dto: HandleFailureDto = parse_body(body)?;
                service.handle_failure(id, dto.into()).await?;
            }
            TaskAction::Unlock => service.unlock(id).await?,
            TaskAction::ExtendLock => {
                let dto: ExtendLockDto = parse_body(body)?;
                service
                    .extend_lock(id, &dto.worker_id, dto.new_duration)
                    .await?;
            }
        }
        Ok::<_, ApiError>(StatusCode::NO_CONTENT)
    }
    .instrument(span)
    .await
}

macro_rules! task_routes {
    ($(($default_fn:ident, $named_fn:ident, $action:expr)),* $(,)?) => {
        $(
            pub async fn $default_fn(
                State(state): State<AppState>,
                Path(id): Path<String>,
                headers: HeaderMap,
                body: Bytes,
            ) -> ApiResult<StatusCode> {
                task_action(&state, None, &id, $action, &headers, &body).await
            }

            pub async fn $named_fn(
                State(state): State<AppState>,
                Path((engine, id)): Path<(String, String)>,
                headers: HeaderMap,
                body: Bytes,
            ) -> ApiResult<StatusCode> {
                task_action(&state, Some(&engine), &id, $action, &headers, &body).await
            }
        )*
    };
}

task_routes!(
    (complete_default, complete_named, TaskAction::Complete),
    (failure_default, failure_named, TaskAction::Failure),
    (unlock_default, unlock_named, TaskAction::Unlock),
    (extend_lock_default, extend_lock_named, TaskAction::ExtendLock),
);
