//! Thin HTTP surface over the workflow service. Every answer is the
//! standard `{code, message, data}` envelope; failures map to envelope
//! codes, not HTTP status codes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    models::{Approval, ApproverRole, Envelope, NewRequest, Request, RequestHistory},
    repository::Freshness,
    ApprovalService, DecisionOutcome,
};

pub fn router(service: ApprovalService) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create).get(list))
        .route("/api/v1/requests/batch", post(batch))
        .route("/api/v1/requests/{request_id}", get(fetch))
        .route("/api/v1/requests/{request_id}/approve", post(approve))
        .route("/api/v1/requests/{request_id}/reject", post(reject))
        .with_state(service)
}

fn reply<T: Serialize>(result: Result<T, super::Error>) -> Json<Envelope<T>> {
    match result {
        Ok(data) => Json(Envelope::success(data)),
        Err(error) => Json(Envelope::failure(error.code(), error.to_string())),
    }
}

async fn create(
    State(service): State<ApprovalService>,
    Json(payload): Json<NewRequest>,
) -> Json<Envelope<Request>> {
    reply(service.create_request(payload).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionPayload {
    role: ApproverRole,
    approver: String,
    comment: Option<String>,
}

async fn approve(
    State(service): State<ApprovalService>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecisionPayload>,
) -> Json<Envelope<DecisionOutcome>> {
    reply(
        service
            .approve(
                request_id,
                payload.role,
                &payload.approver,
                payload.comment.as_deref(),
            )
            .await,
    )
}

async fn reject(
    State(service): State<ApprovalService>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecisionPayload>,
) -> Json<Envelope<DecisionOutcome>> {
    reply(
        service
            .reject(
                request_id,
                payload.role,
                &payload.approver,
                payload.comment.as_deref(),
            )
            .await,
    )
}

/// Single lookup carries the freshness flag so callers can tell a possibly
/// stale cache answer from an authoritative one, plus the full audit trail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchedTicket {
    request: Request,
    freshness: Freshness,
    terminal: bool,
    approvals: Vec<Approval>,
    history: Vec<RequestHistory>,
}

async fn fetch(
    State(service): State<ApprovalService>,
    Path(request_id): Path<Uuid>,
) -> Json<Envelope<FetchedTicket>> {
    let ticket = async {
        let (request, freshness) = service.get(request_id).await?;
        let (approvals, history) = service.audit(request_id).await?;
        Ok::<_, super::Error>(FetchedTicket {
            terminal: request.status.is_terminal(),
            request,
            freshness,
            approvals,
            history,
        })
    }
    .await;
    reply(ticket)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    page_size: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPage {
    items: Vec<Request>,
    total: i64,
}

async fn list(
    State(service): State<ApprovalService>,
    Query(params): Query<ListParams>,
) -> Json<Envelope<RequestPage>> {
    reply(
        service
            .list(params.page, params.page_size)
            .await
            .map(|(items, total)| RequestPage { items, total }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload {
    request_ids: Vec<Uuid>,
}

async fn batch(
    State(service): State<ApprovalService>,
    Json(payload): Json<BatchPayload>,
) -> Json<Envelope<Vec<Request>>> {
    reply(service.batch(&payload.request_ids).await)
}
