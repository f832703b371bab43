use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;

use crate::workflows::contract_approval::domain::{Actor, ApprovalStatus};
use crate::workflows::contract_approval::query::ApprovalQueryService;
use crate::workflows::contract_approval::router::{
    self, actor_from_headers, approval_router, ApprovalApi, PendingQuery, ACTOR_ID_HEADER,
    ACTOR_ROLES_HEADER,
};
use crate::workflows::contract_approval::service::{ApprovalWorkflowService, SubmitApproval};

fn headers_for(actor: &Actor) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACTOR_ID_HEADER,
        HeaderValue::from_str(&actor.id.0).expect("header value"),
    );
    let roles: Vec<&str> = actor.roles.iter().collect();
    headers.insert(
        ACTOR_ROLES_HEADER,
        HeaderValue::from_str(&roles.join(",")).expect("header value"),
    );
    headers
}

fn request(method: Method, uri: &str, actor: Option<&Actor>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        let roles: Vec<&str> = actor.roles.iter().collect();
        builder = builder
            .header(ACTOR_ID_HEADER, actor.id.0.as_str())
            .header(ACTOR_ROLES_HEADER, roles.join(","));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

#[test]
fn identity_headers_are_parsed() {
    let mut headers = HeaderMap::new();
    headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static(" u-hr "));
    headers.insert(ACTOR_ROLES_HEADER, HeaderValue::from_static("HR, Manager"));

    let actor = actor_from_headers(&headers).expect("actor present");
    assert_eq!(actor.id.0, "u-hr");
    assert!(actor.roles.contains("hr"));
    assert!(actor.roles.contains("MANAGER"));

    headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("   "));
    assert!(actor_from_headers(&headers).is_none());
}

#[tokio::test]
async fn submit_route_creates_a_pending_cycle() {
    let harness = harness();
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::POST,
            "/contracts/42/submit-approval",
            Some(&requester()),
            Some(json!({ "comments": "new hire" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["success"], Value::Bool(true));
    assert_eq!(payload["data"]["status"], "Pending");
    assert_eq!(payload["data"]["contractId"], "42");
    assert_eq!(payload["data"]["currentApprovalLevel"], 1);
    assert_eq!(payload["data"]["maxApprovalLevel"], 2);
    assert_eq!(
        payload["data"]["approvalSteps"].as_array().map(Vec::len),
        Some(2)
    );
}

#[tokio::test]
async fn submit_route_accepts_an_empty_body() {
    let harness = harness();
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::POST,
            "/contracts/42/submit-approval",
            Some(&requester()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let harness = harness();
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::GET,
            "/contracts/approvals/pending",
            None,
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["success"], Value::Bool(false));
    assert_eq!(payload["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn approve_and_reject_routes_map_outcomes() {
    let harness = harness();
    let approval = submit(&harness, CONTRACT_42);
    let app = approval_router(harness.api());

    let wrong_role = app
        .clone()
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/approve", approval.id),
            Some(&hr()),
            Some(json!({})),
        ))
        .await
        .expect("route executes");
    assert_eq!(wrong_role.status(), StatusCode::UNAUTHORIZED);

    let out_of_order = app
        .clone()
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/approve", approval.id),
            Some(&manager()),
            Some(json!({ "level": 2 })),
        ))
        .await
        .expect("route executes");
    assert_eq!(out_of_order.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json_body(out_of_order).await["error"]["code"],
        "invalid_state"
    );

    let approved = app
        .clone()
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/approve", approval.id),
            Some(&manager()),
            Some(json!({ "comments": "fine", "level": 1 })),
        ))
        .await
        .expect("route executes");
    assert_eq!(approved.status(), StatusCode::OK);
    assert_eq!(
        read_json_body(approved).await["data"]["currentApprovalLevel"],
        2
    );

    let replayed = app
        .clone()
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/approve", approval.id),
            Some(&second_manager()),
            Some(json!({ "level": 1 })),
        ))
        .await
        .expect("route executes");
    assert_eq!(replayed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json_body(replayed).await["error"]["code"], "conflict");

    let rejected = app
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/reject", approval.id),
            Some(&hr()),
            Some(json!({ "reason": "budget exceeded" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(rejected.status(), StatusCode::OK);
    let payload = read_json_body(rejected).await;
    assert_eq!(payload["data"]["status"], "Rejected");
    assert_eq!(payload["data"]["rejectionReason"], "budget exceeded");
}

#[tokio::test]
async fn unknown_approval_is_not_found() {
    let harness = harness();
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::PUT,
            "/contracts/approvals/does-not-exist/approve",
            Some(&manager()),
            Some(json!({})),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json_body(response).await["error"]["code"], "not_found");
}

#[tokio::test]
async fn duplicate_submit_is_a_conflict() {
    let harness = harness();
    submit(&harness, CONTRACT_42);

    let response = router::submit_handler::<_, MemoryContracts>(
        State(Arc::new(harness.api())),
        Path(CONTRACT_42.to_string()),
        headers_for(&requester()),
        Some(axum::Json(SubmitApproval::default())),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json_body(response).await["error"]["code"], "conflict");
}

#[tokio::test]
async fn pending_handler_pages_the_inbox() {
    let harness = harness();
    submit(&harness, CONTRACT_42);
    submit(&harness, "43");

    let response = router::pending_handler::<_, MemoryContracts>(
        State(Arc::new(harness.api())),
        headers_for(&manager()),
        Query(PendingQuery {
            page_number: Some(1),
            page_size: Some(1),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["data"]["totalCount"], 2);
    assert_eq!(payload["data"]["totalPages"], 2);
    assert_eq!(payload["data"]["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn pending_route_reads_query_parameters() {
    let harness = harness();
    submit(&harness, CONTRACT_42);
    submit(&harness, "43");
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::GET,
            "/contracts/approvals/pending?pageNumber=2&pageSize=1",
            Some(&manager()),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["data"]["pageNumber"], 2);
    assert_eq!(payload["data"]["items"][0]["contractId"], "43");
}

#[tokio::test]
async fn history_and_detail_routes_return_records() {
    let harness = harness();
    let approval = submit(&harness, CONTRACT_42);
    let app = approval_router(harness.api());

    let history = app
        .clone()
        .oneshot(request(
            Method::GET,
            "/contracts/42/approval-history",
            Some(&hr()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(history.status(), StatusCode::OK);
    let payload = read_json_body(history).await;
    let steps = payload["data"].as_array().expect("array of steps");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["level"], 1);
    assert_eq!(steps[0]["cycleStatus"], "Pending");
    assert_eq!(steps[0]["eligibility"]["kind"], "role");

    let detail = app
        .oneshot(request(
            Method::GET,
            &format!("/contracts/approvals/{}", approval.id),
            Some(&hr()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(detail.status(), StatusCode::OK);
    assert_eq!(read_json_body(detail).await["data"]["id"], approval.id.0.as_str());
}

#[tokio::test]
async fn cancel_route_withdraws_the_cycle() {
    let harness = harness();
    let approval = submit(&harness, CONTRACT_42);
    let app = approval_router(harness.api());

    let response = app
        .oneshot(request(
            Method::PUT,
            &format!("/contracts/approvals/{}/cancel", approval.id),
            Some(&requester()),
            Some(json!({ "reason": "position frozen" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);

    let stored = harness.service.get(&approval.id).expect("stored");
    assert_eq!(stored.status, ApprovalStatus::Cancelled);
    assert_eq!(
        harness.audit.records().last().and_then(|r| r.detail.clone()),
        Some("position frozen".to_string())
    );
}

#[tokio::test]
async fn repository_failure_is_internal_error() {
    let store = Arc::new(UnavailableRepository);
    let api = ApprovalApi {
        workflow: Arc::new(ApprovalWorkflowService::new(
            store.clone(),
            Arc::new(MemoryContracts::with(default_contracts())),
            Arc::new(RecordingAudit::default()),
            Arc::new(RecordingNotifications::default()),
            policy(),
        )),
        queries: Arc::new(ApprovalQueryService::new(store, policy(), 50)),
    };

    let response = router::history_handler::<UnavailableRepository, MemoryContracts>(
        State(Arc::new(api)),
        Path(CONTRACT_42.to_string()),
        headers_for(&hr()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "internal_error");
    assert_eq!(payload["error"]["message"], "an unexpected error occurred");
}
