// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the controller API.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use luna_core::types::subsystem;
use luna_core::{LunaError, Role};
use luna_journal::{JournalBatch, JournalRequest};
use luna_mother::{EnqueueOutcome, TaskSubmission, journal_function};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::GatewayState;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A handler failure with the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<LunaError> for ApiError {
    fn from(e: LunaError) -> Self {
        let status = match &e {
            LunaError::InvalidTask(_) | LunaError::UnknownFunction(_) => StatusCode::BAD_REQUEST,
            LunaError::OutOfSync(_) => StatusCode::SERVICE_UNAVAILABLE,
            LunaError::Busy(_) => StatusCode::CONFLICT,
            LunaError::Replication { .. } => StatusCode::BAD_GATEWAY,
            LunaError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %e, "request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub hostname: String,
    pub role: Role,
    pub master: Option<String>,
    pub insync: bool,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> ApiResult<HealthResponse> {
    let ha = state.journal.ha();
    let current = ha.state().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: ha.me().to_string(),
        role: current.role,
        master: current.master,
        insync: current.insync,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
}

/// GET /status/{request_id}
///
/// Returns every unread line and marks it read. 404 once the stream was
/// fully consumed or never existed.
pub async fn get_status(
    State(state): State<GatewayState>,
    Path(request_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    match state.dispatcher.status().get_status(&request_id).await? {
        Some(report) => Ok(Json(StatusResponse {
            message: report.message,
        })),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no status for request {request_id}"),
        )),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalAccepted {
    pub inbound: usize,
    pub forwarded: usize,
}

/// POST /journal
pub async fn post_journal(
    State(state): State<GatewayState>,
    Json(batch): Json<JournalBatch>,
) -> ApiResult<JournalAccepted> {
    let report = state.journal.update_journal(batch.journal).await?;
    Ok(Json(JournalAccepted {
        inbound: report.inbound,
        forwarded: report.forwarded,
    }))
}

/// GET /journal/{host}
pub async fn get_journal(
    State(state): State<GatewayState>,
    Path(host): Path<String>,
) -> ApiResult<JournalBatch> {
    let journal = state.journal.entries_for(&host).await?;
    Ok(Json(JournalBatch { journal }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    /// Highest id the caller stored. Absent clears everything for the host.
    pub upto: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalDeleted {
    pub deleted: usize,
}

/// GET /journal/{host}/_delete
pub async fn delete_journal(
    State(state): State<GatewayState>,
    Path(host): Path<String>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<JournalDeleted> {
    let deleted = state.journal.acknowledge(&host, params.upto).await?;
    Ok(Json(JournalDeleted { deleted }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub request_id: String,
    pub message: String,
    #[serde(default)]
    pub complete: bool,
}

/// POST /tasks/{subsystem}
///
/// Journals the submission for the siblings, then queues and dispatches it
/// locally. Master-only work submitted to a backup is left to the master.
/// A duplicate of live local work is answered without journaling.
pub async fn post_task(
    State(state): State<GatewayState>,
    Path(target): Path<String>,
    Json(submission): Json<TaskSubmission>,
) -> Result<Response, ApiError> {
    if ![subsystem::OSIMAGE, subsystem::HOUSEKEEPER, subsystem::CONTROL].contains(&target.as_str()) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("unknown subsystem {target}"),
        ));
    }
    if submission.verb.home_subsystem() != Some(target.as_str()) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{} is not a {target} task", submission.verb),
        ));
    }

    let request_id = Uuid::new_v4().to_string();
    let task = submission.to_task(target.as_str(), &request_id)?;
    let object = task.descriptor.object().to_string();

    if !task.force {
        let queue = state.dispatcher.queue();
        if let Some(live) = queue.find_live_task(&target, &task.descriptor).await? {
            debug!(task_id = live.id, task = %task.descriptor, "duplicate submission, not journaled");
            let body = TaskResponse {
                request_id: live.request_id,
                message: EnqueueOutcome::AlreadyQueued.to_string(),
                complete: false,
            };
            return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
        }
    }

    let mut masteronly = false;
    if let Some((function, master_only)) = journal_function(&target, submission.verb) {
        masteronly = master_only;
        let payload = serde_json::to_value(&submission)
            .map_err(|e| LunaError::Internal(format!("unserializable submission: {e}")))?;
        state
            .journal
            .add_request(
                JournalRequest::new(function, object.as_str())
                    .payload(payload)
                    .masteronly(masteronly)
                    .misc(request_id.as_str()),
            )
            .await?;
    }

    let ha = state.journal.ha().state().await?;
    if masteronly && ha.enabled && ha.role == Role::Backup {
        let master = ha.master.unwrap_or_else(|| "the master".to_string());
        info!(verb = %submission.verb, object = %object, master = %master, "task forwarded to master");
        let body = TaskResponse {
            request_id,
            message: format!("{} {object} forwarded to {master}", submission.verb),
            complete: true,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let outcome = state.dispatcher.submit(task).await?;
    let status = if outcome.complete {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let body = TaskResponse {
        request_id: outcome.request_id,
        message: outcome.message,
        complete: outcome.complete,
    };
    Ok((status, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SetMasterRequest {
    pub host: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetMasterResponse {
    pub master: String,
    pub role: Role,
}

/// POST /ha/master
pub async fn post_master(
    State(state): State<GatewayState>,
    Json(body): Json<SetMasterRequest>,
) -> ApiResult<SetMasterResponse> {
    if !state.journal.ha().topology().is_known(&body.host) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{} is not a configured controller", body.host),
        ));
    }
    let role = state.journal.set_master(&body.host).await?;
    Ok(Json(SetMasterResponse {
        master: body.host,
        role,
    }))
}
