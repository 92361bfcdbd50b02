//! Role-gated approval workflow over composite deployment tickets.

use snafu::{ensure, ResultExt, Snafu};
use sqlx::PgPool;
use strum::{EnumDiscriminants, IntoStaticStr};
use uuid::Uuid;

use self::{
    models::{
        stage_steps, ApproverRole, Decision, NewRequest, Pagination, Request, RequestStatus,
        StageStep, CODE_AUTHORIZATION, CODE_INTERNAL, CODE_NOT_FOUND, CODE_VALIDATION,
    },
    repository::{DecisionRecord, Freshness, RequestRepository},
};

pub mod api;
pub mod config;
pub mod engine;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod roles;
pub mod template;
pub mod trigger;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("invalid request: {message}"))]
    Validation { message: String },
    #[snafu(display("[{approver}] does not hold the [{role}] role"))]
    Authorization {
        approver: String,
        role: ApproverRole,
    },
    #[snafu(display(
        "no legal transition from [{current}] for role [{role}] deciding [{decision}]"
    ))]
    InvalidTransition {
        current: RequestStatus,
        role: ApproverRole,
        decision: Decision,
    },
    #[snafu(display("ticket [{request_id}] does not exist"))]
    TicketNotFound { request_id: Uuid },
    #[snafu(display("failed to look up role assignment"))]
    RoleLookup { source: sqlx::Error },
    #[snafu(display("ticket store failure"))]
    Persistence { source: repository::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Numeric envelope code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Error::Validation { .. } => CODE_VALIDATION,
            Error::Authorization { .. } | Error::InvalidTransition { .. } => CODE_AUTHORIZATION,
            Error::TicketNotFound { .. } => CODE_NOT_FOUND,
            Error::RoleLookup { .. } | Error::Persistence { .. } => CODE_INTERNAL,
        }
    }
}

fn lift(error: repository::Error) -> Error {
    match error {
        repository::Error::RequestNotFound { request_id } => Error::TicketNotFound { request_id },
        repository::Error::TemplateNotFound { template_id } => Error::Validation {
            message: format!("template [{template_id}] does not exist"),
        },
        other => Error::Persistence { source: other },
    }
}

/// Result of a decision: the moved ticket plus the static description of
/// the three fixed stages.
#[derive(Debug, serde::Serialize)]
pub struct DecisionOutcome {
    pub request: Request,
    pub steps: Vec<StageStep>,
}

#[derive(Clone)]
pub struct ApprovalService {
    pool: PgPool,
    repository: RequestRepository,
}

fn ensure_authorized(authorized: bool, approver: &str, role: ApproverRole) -> Result<()> {
    ensure!(
        authorized,
        AuthorizationSnafu {
            approver: approver.to_string(),
            role,
        }
    );
    Ok(())
}

fn validate_new_request(new: &NewRequest) -> Result<()> {
    ensure!(
        !new.applicant.trim().is_empty(),
        ValidationSnafu {
            message: "applicant must not be empty",
        }
    );
    ensure!(
        !new.business_line.trim().is_empty(),
        ValidationSnafu {
            message: "business line must not be empty",
        }
    );
    ensure!(
        !new.service_name.trim().is_empty(),
        ValidationSnafu {
            message: "service name must not be empty",
        }
    );
    ensure!(
        new.template_id > 0,
        ValidationSnafu {
            message: "template reference must be a positive id",
        }
    );
    if let Some(replicas) = new.replicas {
        ensure!(
            replicas >= 0,
            ValidationSnafu {
                message: "replica count must not be negative",
            }
        );
    }
    Ok(())
}

impl ApprovalService {
    pub fn new(pool: PgPool, repository: RequestRepository) -> Self {
        ApprovalService { pool, repository }
    }

    /// Submit a new ticket. It is born `PENDING` with operation defaulting
    /// to CREATE.
    pub async fn create_request(&self, new: NewRequest) -> Result<Request> {
        validate_new_request(&new)?;
        self.repository
            .find_template(new.template_id)
            .await
            .map_err(lift)?;
        self.repository.create_request(&new).await.map_err(lift)
    }

    pub async fn approve(
        &self,
        request_id: Uuid,
        role: ApproverRole,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<DecisionOutcome> {
        self.decide(request_id, role, approver, Decision::Approve, comment)
            .await
    }

    pub async fn reject(
        &self,
        request_id: Uuid,
        role: ApproverRole,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<DecisionOutcome> {
        self.decide(request_id, role, approver, Decision::Reject, comment)
            .await
    }

    /// Authorize, evaluate the stage table and persist the decision as a
    /// single transaction. The conditional status update inside the
    /// transaction is what keeps two decisions for the same stage from
    /// both landing, even when this method read a stale cached ticket.
    async fn decide(
        &self,
        request_id: Uuid,
        role: ApproverRole,
        approver: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<DecisionOutcome> {
        ensure!(
            !approver.trim().is_empty(),
            ValidationSnafu {
                message: "approver identity must not be empty",
            }
        );
        let authorized = roles::user_has_role(&self.pool, approver, role)
            .await
            .context(RoleLookupSnafu)?;
        ensure_authorized(authorized, approver, role)?;

        let (request, _freshness) = self
            .repository
            .find_by_request_id(request_id)
            .await
            .map_err(lift)?;
        let current = request.status;
        let next = engine::next_status(current, role, decision).ok_or(Error::InvalidTransition {
            current,
            role,
            decision,
        })?;
        let enqueue_dispatch =
            (next == RequestStatus::K8sApproved).then_some(request.operation);

        let updated = self
            .repository
            .apply_decision(DecisionRecord {
                request_id,
                expected: current,
                next,
                role,
                approver,
                decision,
                comment,
                enqueue_dispatch,
            })
            .await
            .map_err(|error| match error {
                // the ticket moved between read and write, same answer as
                // an off-table decision
                repository::Error::StageConflict { .. } => Error::InvalidTransition {
                    current,
                    role,
                    decision,
                },
                other => lift(other),
            })?;

        Ok(DecisionOutcome {
            request: updated,
            steps: stage_steps(),
        })
    }

    pub async fn get(&self, request_id: Uuid) -> Result<(Request, Freshness)> {
        self.repository
            .find_by_request_id(request_id)
            .await
            .map_err(lift)
    }

    /// Full audit trail of a ticket, straight from the store.
    pub async fn audit(
        &self,
        request_id: Uuid,
    ) -> Result<(Vec<models::Approval>, Vec<models::RequestHistory>)> {
        let approvals = self
            .repository
            .approvals_for(request_id)
            .await
            .map_err(lift)?;
        let history = self
            .repository
            .history_for(request_id)
            .await
            .map_err(lift)?;
        Ok((approvals, history))
    }

    /// Paginated listing, newest first.
    pub async fn list(&self, page: u32, page_size: u32) -> Result<(Vec<Request>, i64)> {
        self.repository
            .list(Pagination::clamped(page, page_size))
            .await
            .map_err(lift)
    }

    /// Batch lookup; absent ids are omitted from the answer, not errored.
    pub async fn batch(&self, request_ids: &[Uuid]) -> Result<Vec<Request>> {
        ensure!(
            !request_ids.is_empty(),
            ValidationSnafu {
                message: "ticket id set must not be empty",
            }
        );
        self.repository.batch_find(request_ids).await.map_err(lift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request() -> NewRequest {
        NewRequest {
            applicant: "zhang".to_string(),
            business_line: "retail".to_string(),
            service_name: "shop".to_string(),
            image: "registry.local/shop:v1".to_string(),
            replicas: Some(3),
            template_id: 7,
            purpose: "initial rollout".to_string(),
            operation: None,
        }
    }

    #[test]
    fn test_submission_validation() {
        assert!(validate_new_request(&new_request()).is_ok());

        let mut missing_applicant = new_request();
        missing_applicant.applicant = "  ".to_string();
        assert!(matches!(
            validate_new_request(&missing_applicant),
            Err(Error::Validation { .. })
        ));

        let mut bad_template = new_request();
        bad_template.template_id = 0;
        assert!(matches!(
            validate_new_request(&bad_template),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_role_is_an_authorization_failure() {
        assert!(ensure_authorized(true, "zhang", ApproverRole::Sre).is_ok());
        assert!(matches!(
            ensure_authorized(false, "zhang", ApproverRole::Sre),
            Err(Error::Authorization { approver, role })
                if approver == "zhang" && role == ApproverRole::Sre
        ));
    }

    #[test]
    fn test_envelope_codes_per_failure_class() {
        assert_eq!(
            Error::Validation {
                message: "x".to_string()
            }
            .code(),
            CODE_VALIDATION
        );
        assert_eq!(
            Error::Authorization {
                approver: "zhang".to_string(),
                role: ApproverRole::Ops,
            }
            .code(),
            CODE_AUTHORIZATION
        );
        assert_eq!(
            Error::InvalidTransition {
                current: RequestStatus::Pending,
                role: ApproverRole::K8s,
                decision: Decision::Approve,
            }
            .code(),
            CODE_AUTHORIZATION
        );
        assert_eq!(
            Error::TicketNotFound {
                request_id: Uuid::nil()
            }
            .code(),
            CODE_NOT_FOUND
        );
    }
}
