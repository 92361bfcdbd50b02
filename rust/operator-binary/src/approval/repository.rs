//! Cache-through persistence for workflow tickets. Postgres is the system
//! of record; Redis is a time-boxed read accelerator that is repopulated
//! off the critical path and whose failures are swallowed.

use std::time::Duration;

use redis::{aio::ConnectionManager, AsyncCommands};
use snafu::{OptionExt, ResultExt, Snafu};
use sqlx::PgPool;
use strum::{EnumDiscriminants, IntoStaticStr};
use uuid::Uuid;

use super::models::{
    Approval, ApproverRole, Decision, NewRequest, Operation, Pagination, Request, RequestHistory,
    RequestStatus, Template,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to persist new ticket"))]
    CreateRequest { source: sqlx::Error },
    #[snafu(display("failed to load ticket [{request_id}]"))]
    FindRequest {
        source: sqlx::Error,
        request_id: Uuid,
    },
    #[snafu(display("ticket [{request_id}] does not exist"))]
    RequestNotFound { request_id: Uuid },
    #[snafu(display("failed to load template [{template_id}]"))]
    FindTemplate {
        source: sqlx::Error,
        template_id: i64,
    },
    #[snafu(display("template [{template_id}] does not exist"))]
    TemplateNotFound { template_id: i64 },
    #[snafu(display("failed to load approval trail for ticket [{request_id}]"))]
    FindApprovals {
        source: sqlx::Error,
        request_id: Uuid,
    },
    #[snafu(display("failed to load history trail for ticket [{request_id}]"))]
    FindHistory {
        source: sqlx::Error,
        request_id: Uuid,
    },
    #[snafu(display("failed to list tickets"))]
    ListRequests { source: sqlx::Error },
    #[snafu(display("failed to batch-load tickets"))]
    BatchFindRequests { source: sqlx::Error },
    #[snafu(display("failed to delete ticket [{request_id}]"))]
    DeleteRequest {
        source: sqlx::Error,
        request_id: Uuid,
    },
    #[snafu(display("failed to open decision transaction"))]
    BeginDecision { source: sqlx::Error },
    #[snafu(display("failed to update ticket status"))]
    UpdateStatus { source: sqlx::Error },
    #[snafu(display("failed to append approval audit row"))]
    InsertApproval { source: sqlx::Error },
    #[snafu(display("failed to append history audit row"))]
    InsertHistory { source: sqlx::Error },
    #[snafu(display("failed to enqueue deployment dispatch"))]
    EnqueueDispatch { source: sqlx::Error },
    #[snafu(display("failed to commit decision transaction"))]
    CommitDecision { source: sqlx::Error },
    #[snafu(display(
        "ticket [{request_id}] is no longer at stage [{expected}], decision not applied"
    ))]
    StageConflict {
        request_id: Uuid,
        expected: RequestStatus,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Where a single read was answered from. Cache reads may be stale within
/// the TTL window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    Cache,
    Store,
}

/// Everything one approve/reject writes, applied as a single transaction.
#[derive(Debug)]
pub struct DecisionRecord<'a> {
    pub request_id: Uuid,
    pub expected: RequestStatus,
    pub next: RequestStatus,
    pub role: ApproverRole,
    pub approver: &'a str,
    pub decision: Decision,
    pub comment: Option<&'a str>,
    /// `Some` exactly when the transition reaches the final approved stage;
    /// the dispatch row commits or rolls back with the decision itself.
    pub enqueue_dispatch: Option<Operation>,
}

#[derive(Clone)]
pub struct RequestRepository {
    pool: PgPool,
    cache: ConnectionManager,
    cache_ttl: Duration,
}

pub fn cache_key(request_id: Uuid) -> String {
    format!("approval:request:{request_id}")
}

/// Split a batch into cache hits and the ids still owed to the store.
/// `cached` carries one per-id answer, in the order of `request_ids`.
fn partition_batch(
    request_ids: &[Uuid],
    cached: Vec<Option<Request>>,
) -> (Vec<Request>, Vec<Uuid>) {
    let mut found = Vec::with_capacity(request_ids.len());
    let mut misses = Vec::new();
    for (&request_id, answer) in request_ids.iter().zip(cached) {
        match answer {
            Some(request) => found.push(request),
            None => misses.push(request_id),
        }
    }
    (found, misses)
}

impl RequestRepository {
    pub fn new(pool: PgPool, cache: ConnectionManager, cache_ttl: Duration) -> Self {
        RequestRepository {
            pool,
            cache,
            cache_ttl,
        }
    }

    pub async fn create_request(&self, new: &NewRequest) -> Result<Request> {
        let operation = new.operation.unwrap_or(Operation::Create);
        let request: Request = sqlx::query_as(
            "INSERT INTO requests \
                 (request_id, applicant, business_line, service_name, image, replicas, \
                  template_id, purpose, operation, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new.applicant)
        .bind(&new.business_line)
        .bind(&new.service_name)
        .bind(&new.image)
        .bind(new.replicas.unwrap_or(0))
        .bind(new.template_id)
        .bind(&new.purpose)
        .bind(operation.to_string())
        .bind(RequestStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await
        .context(CreateRequestSnafu)?;

        self.spawn_cache_store(request.clone());
        Ok(request)
    }

    /// Single read: cache first, store on miss. The freshness flag tells the
    /// caller whether the answer may be stale.
    pub async fn find_by_request_id(&self, request_id: Uuid) -> Result<(Request, Freshness)> {
        if let Some(request) = self.read_cache(request_id).await {
            return Ok((request, Freshness::Cache));
        }

        let request = self.find_in_store(request_id).await?;
        Ok((request, Freshness::Store))
    }

    /// Authoritative read straight from the store, never the cache. Callers
    /// that decide on a ticket's stage (the dispatch worker) go through this
    /// so a lagging cache entry cannot misreport the stage for a full TTL.
    pub async fn find_in_store(&self, request_id: Uuid) -> Result<Request> {
        let request: Request = sqlx::query_as("SELECT * FROM requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .context(FindRequestSnafu { request_id })?
            .context(RequestNotFoundSnafu { request_id })?;

        self.spawn_cache_store(request.clone());
        Ok(request)
    }

    /// Batch read: cache hits merged with one store query for the misses.
    /// Missing ids are omitted, not errored; result ordering is unspecified.
    pub async fn batch_find(&self, request_ids: &[Uuid]) -> Result<Vec<Request>> {
        let mut cached = Vec::with_capacity(request_ids.len());
        for &request_id in request_ids {
            cached.push(self.read_cache(request_id).await);
        }
        let (mut found, misses) = partition_batch(request_ids, cached);

        if !misses.is_empty() {
            let from_store: Vec<Request> =
                sqlx::query_as("SELECT * FROM requests WHERE request_id = ANY($1)")
                    .bind(&misses)
                    .fetch_all(&self.pool)
                    .await
                    .context(BatchFindRequestsSnafu)?;
            for request in &from_store {
                self.spawn_cache_store(request.clone());
            }
            found.extend(from_store);
        }

        Ok(found)
    }

    /// Paginated listing ordered by creation time descending, with the
    /// total row count.
    pub async fn list(&self, pagination: Pagination) -> Result<(Vec<Request>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(&self.pool)
            .await
            .context(ListRequestsSnafu)?;
        let items: Vec<Request> =
            sqlx::query_as("SELECT * FROM requests ORDER BY created_at DESC LIMIT $1 OFFSET $2")
                .bind(pagination.limit())
                .bind(pagination.offset())
                .fetch_all(&self.pool)
                .await
                .context(ListRequestsSnafu)?;
        Ok((items, total))
    }

    pub async fn find_template(&self, template_id: i64) -> Result<Template> {
        sqlx::query_as("SELECT * FROM templates WHERE id = $1")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await
            .context(FindTemplateSnafu { template_id })?
            .context(TemplateNotFoundSnafu { template_id })
    }

    /// Remove a ticket after a completed DELETE dispatch. Absence is a
    /// no-op, not an error.
    pub async fn delete_request(&self, request_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await
            .context(DeleteRequestSnafu { request_id })?;
        self.spawn_cache_evict(request_id);
        Ok(())
    }

    /// Apply one approve/reject decision as an all-or-nothing unit: the
    /// conditional status update, one approval row, one history row and, on
    /// final approval, the outbox row. The `WHERE status = expected` guard
    /// is the sole defense against two decisions racing for the same stage.
    pub async fn apply_decision(&self, record: DecisionRecord<'_>) -> Result<Request> {
        let mut tx = self.pool.begin().await.context(BeginDecisionSnafu)?;

        let updated: Option<Request> = sqlx::query_as(
            "UPDATE requests SET status = $3, updated_at = NOW() \
             WHERE request_id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(record.request_id)
        .bind(record.expected.to_string())
        .bind(record.next.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context(UpdateStatusSnafu)?;
        let updated = updated.context(StageConflictSnafu {
            request_id: record.request_id,
            expected: record.expected,
        })?;

        sqlx::query(
            "INSERT INTO approvals (request_id, role, approver, decision, comment) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.request_id)
        .bind(record.role.to_string())
        .bind(record.approver)
        .bind(record.decision.to_string())
        .bind(record.comment)
        .execute(&mut *tx)
        .await
        .context(InsertApprovalSnafu)?;

        sqlx::query(
            "INSERT INTO request_history (request_id, status, actor, note) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(record.request_id)
        .bind(record.next.to_string())
        .bind(record.approver)
        .bind(record.comment)
        .execute(&mut *tx)
        .await
        .context(InsertHistorySnafu)?;

        if let Some(operation) = record.enqueue_dispatch {
            // idempotency key: one dispatch per (ticket, target stage)
            sqlx::query(
                "INSERT INTO deploy_outbox (request_id, target_status, operation) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (request_id, target_status) DO NOTHING",
            )
            .bind(record.request_id)
            .bind(record.next.to_string())
            .bind(operation.to_string())
            .execute(&mut *tx)
            .await
            .context(EnqueueDispatchSnafu)?;
        }

        tx.commit().await.context(CommitDecisionSnafu)?;

        self.spawn_cache_store(updated.clone());
        Ok(updated)
    }

    pub async fn approvals_for(&self, request_id: Uuid) -> Result<Vec<Approval>> {
        sqlx::query_as("SELECT * FROM approvals WHERE request_id = $1 ORDER BY created_at")
            .bind(request_id)
            .fetch_all(&self.pool)
            .await
            .context(FindApprovalsSnafu { request_id })
    }

    pub async fn history_for(&self, request_id: Uuid) -> Result<Vec<RequestHistory>> {
        sqlx::query_as("SELECT * FROM request_history WHERE request_id = $1 ORDER BY created_at")
            .bind(request_id)
            .fetch_all(&self.pool)
            .await
            .context(FindHistorySnafu { request_id })
    }

    async fn read_cache(&self, request_id: Uuid) -> Option<Request> {
        let mut cache = self.cache.clone();
        let key = cache_key(request_id);
        match cache.get::<_, Option<String>>(&key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(request) => Some(request),
                Err(error) => {
                    tracing::warn!(%key, %error, "undecodable cache entry, falling back to store");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%key, %error, "cache read failed, falling back to store");
                None
            }
        }
    }

    /// Repopulate the cache off the critical path. Failures are logged and
    /// dropped; the store already holds the committed truth.
    fn spawn_cache_store(&self, request: Request) {
        let mut cache = self.cache.clone();
        let ttl_secs = self.cache_ttl.as_secs();
        tokio::spawn(async move {
            let key = cache_key(request.request_id);
            match serde_json::to_string(&request) {
                Ok(payload) => {
                    if let Err(error) = cache.set_ex::<_, _, ()>(&key, payload, ttl_secs).await {
                        tracing::warn!(%key, %error, "cache repopulation failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(%key, %error, "failed to serialize ticket for the cache");
                }
            }
        });
    }

    fn spawn_cache_evict(&self, request_id: Uuid) {
        let mut cache = self.cache.clone();
        tokio::spawn(async move {
            let key = cache_key(request_id);
            if let Err(error) = cache.del::<_, ()>(&key).await {
                tracing::warn!(%key, %error, "cache eviction failed, entry expires by TTL");
            }
        });
    }
}
