//! Persistent rows and wire shapes of the approval workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

pub const CODE_SUCCESS: i32 = 20000;
pub const CODE_VALIDATION: i32 = 40000;
pub const CODE_AUTHORIZATION: i32 = 40001;
pub const CODE_NOT_FOUND: i32 = 40400;
pub const CODE_INTERNAL: i32 = 50000;

/// Stage of a ticket in the fixed OPS -> SRE -> K8S graph.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    OpsApproved,
    OpsRejected,
    SreApproved,
    SreRejected,
    K8sApproved,
    K8sRejected,
}

impl RequestStatus {
    /// Terminal stages admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::OpsRejected
                | RequestStatus::SreRejected
                | RequestStatus::K8sApproved
                | RequestStatus::K8sRejected
        )
    }
}

impl TryFrom<String> for RequestStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl TryFrom<String> for Operation {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Role an approver acts under. `ADMIN` exists in the role store for
/// administration but never appears in the transition table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApproverRole {
    Ops,
    Sre,
    K8s,
}

impl TryFrom<String> for ApproverRole {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl TryFrom<String> for Decision {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Workflow ticket. Created once by submission and mutated only by the
/// workflow engine.
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: i64,
    pub request_id: Uuid,
    pub applicant: String,
    pub business_line: String,
    pub service_name: String,
    pub image: String,
    pub replicas: i32,
    pub template_id: i64,
    pub purpose: String,
    #[sqlx(try_from = "String")]
    pub operation: Operation,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission payload for a new ticket.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub applicant: String,
    pub business_line: String,
    pub service_name: String,
    pub image: String,
    pub replicas: Option<i32>,
    pub template_id: i64,
    pub purpose: String,
    pub operation: Option<Operation>,
}

/// Append-only audit row, one per approve/reject decision.
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: i64,
    pub request_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: ApproverRole,
    pub approver: String,
    #[sqlx(try_from = "String")]
    pub decision: Decision,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row, one per status change.
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistory {
    pub id: i64,
    pub request_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub actor: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored composite descriptor template referenced by tickets.
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pending deployment action persisted in the same transaction as the
/// approval that caused it.
#[derive(Clone, Debug, FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    pub request_id: Uuid,
    #[sqlx(try_from = "String")]
    pub target_status: RequestStatus,
    #[sqlx(try_from = "String")]
    pub operation: Operation,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page selection, clamped to sane bounds at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    page_size: u32,
}

impl Pagination {
    pub fn clamped(page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            oversized if oversized > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
            fitting => fitting,
        };
        Pagination { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::clamped(1, DEFAULT_PAGE_SIZE)
    }
}

/// Standard response envelope carried by every workflow answer.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            code: CODE_SUCCESS,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Envelope {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// One node of the static stage description returned with every decision.
#[derive(Clone, Debug, Serialize)]
pub struct StageStep {
    pub order: u8,
    pub role: ApproverRole,
    pub description: &'static str,
}

/// The fixed, human-readable three-stage description.
pub fn stage_steps() -> Vec<StageStep> {
    vec![
        StageStep {
            order: 1,
            role: ApproverRole::Ops,
            description: "operations review of capacity and business justification",
        },
        StageStep {
            order: 2,
            role: ApproverRole::Sre,
            description: "reliability review of rollout strategy and resource limits",
        },
        StageStep {
            order: 3,
            role: ApproverRole::K8s,
            description: "platform review and final release into the cluster",
        },
    ]
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(RequestStatus::Pending, "PENDING")]
    #[case(RequestStatus::OpsApproved, "OPS_APPROVED")]
    #[case(RequestStatus::SreRejected, "SRE_REJECTED")]
    #[case(RequestStatus::K8sApproved, "K8S_APPROVED")]
    fn test_status_round_trips_through_storage_form(
        #[case] status: RequestStatus,
        #[case] stored: &str,
    ) {
        assert_eq!(status.to_string(), stored);
        assert_eq!(RequestStatus::try_from(stored.to_string()).unwrap(), status);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::OpsApproved.is_terminal());
        assert!(!RequestStatus::SreApproved.is_terminal());
        assert!(RequestStatus::OpsRejected.is_terminal());
        assert!(RequestStatus::SreRejected.is_terminal());
        assert!(RequestStatus::K8sApproved.is_terminal());
        assert!(RequestStatus::K8sRejected.is_terminal());
    }

    #[rstest]
    #[case(0, 0, 1, 10)]
    #[case(1, 10, 1, 10)]
    #[case(3, 25, 3, 25)]
    #[case(2, 500, 2, 100)]
    fn test_pagination_clamping(
        #[case] page: u32,
        #[case] page_size: u32,
        #[case] expected_page: u32,
        #[case] expected_size: u32,
    ) {
        let pagination = Pagination::clamped(page, page_size);
        assert_eq!(pagination.limit(), i64::from(expected_size));
        assert_eq!(
            pagination.offset(),
            i64::from(expected_page - 1) * i64::from(expected_size)
        );
    }

    #[test]
    fn test_stage_steps_cover_the_three_roles_in_order() {
        let steps = stage_steps();
        let roles: Vec<_> = steps.iter().map(|step| step.role).collect();
        assert_eq!(roles, [ApproverRole::Ops, ApproverRole::Sre, ApproverRole::K8s]);
    }
}
