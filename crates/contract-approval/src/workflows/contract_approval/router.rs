use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{Actor, ActorId, ApprovalId, ContractId, RoleSet};
use super::query::ApprovalQueryService;
use super::repository::{ApprovalRepository, ContractDirectory};
use super::service::{ApprovalWorkflowService, StepDecision, SubmitApproval, WorkflowError};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

/// Write and read services sharing one repository, handed to the router as state.
pub struct ApprovalApi<R, C> {
    pub workflow: Arc<ApprovalWorkflowService<R, C>>,
    pub queries: Arc<ApprovalQueryService<R>>,
}

impl<R, C> Clone for ApprovalApi<R, C> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            queries: self.queries.clone(),
        }
    }
}

/// Router builder exposing the contract approval endpoints.
pub fn approval_router<R, C>(api: ApprovalApi<R, C>) -> Router
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    Router::new()
        .route(
            "/contracts/:contract_id/submit-approval",
            post(submit_handler::<R, C>),
        )
        .route(
            "/contracts/:contract_id/approval-history",
            get(history_handler::<R, C>),
        )
        .route("/contracts/approvals/pending", get(pending_handler::<R, C>))
        .route(
            "/contracts/approvals/:approval_id",
            get(approval_handler::<R, C>),
        )
        .route(
            "/contracts/approvals/:approval_id/approve",
            put(approve_handler::<R, C>),
        )
        .route(
            "/contracts/approvals/:approval_id/reject",
            put(reject_handler::<R, C>),
        )
        .route(
            "/contracts/approvals/:approval_id/cancel",
            put(cancel_handler::<R, C>),
        )
        .with_state(Arc::new(api))
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            data,
        }),
    )
        .into_response()
}

fn failure(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = json!({
        "success": false,
        "error": { "code": code, "message": message },
    });
    (status, Json(payload)).into_response()
}

fn unauthenticated() -> Response {
    failure(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "caller identity is missing",
    )
}

pub(crate) fn error_response(err: WorkflowError) -> Response {
    match &err {
        WorkflowError::NotFound(_) => {
            failure(StatusCode::NOT_FOUND, "not_found", &err.to_string())
        }
        WorkflowError::Conflict(message) => {
            failure(StatusCode::BAD_REQUEST, "conflict", message)
        }
        WorkflowError::InvalidState(message) => {
            failure(StatusCode::BAD_REQUEST, "invalid_state", message)
        }
        WorkflowError::UnauthorizedAction => {
            failure(StatusCode::UNAUTHORIZED, "unauthorized", &err.to_string())
        }
        WorkflowError::Repository(_) | WorkflowError::Directory(_) => {
            error!(error = %err, "unexpected failure while serving approval request");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "an unexpected error occurred",
            )
        }
    }
}

/// Reads the caller identity the gateway forwards as plain headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let id = headers
        .get(ACTOR_ID_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|id| !id.is_empty())?;
    let roles = headers
        .get(ACTOR_ROLES_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(RoleSet::from_header)
        .unwrap_or_default();

    Some(Actor {
        id: ActorId(id.to_string()),
        roles,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PendingQuery {
    #[serde(default)]
    pub(crate) page_number: Option<u32>,
    #[serde(default)]
    pub(crate) page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CancelRequest {
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

pub(crate) async fn submit_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(contract_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<SubmitApproval>>,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    let Some(actor) = actor_from_headers(&headers) else {
        return unauthenticated();
    };
    let request = body.map(|Json(request)| request).unwrap_or_default();

    match api
        .workflow
        .submit_for_approval(&ContractId(contract_id), &actor, request)
    {
        Ok(approval) => ok(StatusCode::CREATED, approval),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approve_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(approval_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<StepDecision>>,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    let Some(actor) = actor_from_headers(&headers) else {
        return unauthenticated();
    };
    let decision = body.map(|Json(decision)| decision).unwrap_or_default();

    match api
        .workflow
        .approve(&ApprovalId(approval_id), &actor, decision)
    {
        Ok(approval) => ok(StatusCode::OK, approval),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reject_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(approval_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<StepDecision>>,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    let Some(actor) = actor_from_headers(&headers) else {
        return unauthenticated();
    };
    let decision = body.map(|Json(decision)| decision).unwrap_or_default();

    match api
        .workflow
        .reject(&ApprovalId(approval_id), &actor, decision)
    {
        Ok(approval) => ok(StatusCode::OK, approval),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(approval_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    let Some(actor) = actor_from_headers(&headers) else {
        return unauthenticated();
    };
    let note = body.and_then(|Json(request)| request.reason);

    match api.workflow.cancel(&ApprovalId(approval_id), &actor, note) {
        Ok(approval) => ok(StatusCode::OK, approval),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approval_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(approval_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    if actor_from_headers(&headers).is_none() {
        return unauthenticated();
    }

    match api.workflow.get(&ApprovalId(approval_id)) {
        Ok(approval) => ok(StatusCode::OK, approval),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pending_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    headers: HeaderMap,
    Query(query): Query<PendingQuery>,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    let Some(actor) = actor_from_headers(&headers) else {
        return unauthenticated();
    };
    let page = api.queries.page_request(query.page_number, query.page_size);

    match api.queries.pending_approvals(&actor, page) {
        Ok(page) => ok(StatusCode::OK, page),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn history_handler<R, C>(
    State(api): State<Arc<ApprovalApi<R, C>>>,
    Path(contract_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    if actor_from_headers(&headers).is_none() {
        return unauthenticated();
    }

    match api.queries.history_entries(&ContractId(contract_id)) {
        Ok(entries) => ok(StatusCode::OK, entries),
        Err(err) => error_response(err),
    }
}
