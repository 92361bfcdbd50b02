//! Durable dispatch queue. The outbox row commits in the same transaction
//! as the final approval; this worker drains due rows, retries failures
//! with capped exponential backoff and marks each row processed once.

use std::time::Duration;

use snafu::{ResultExt, Snafu};
use sqlx::PgPool;
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    models::{OutboxEntry, Request, RequestStatus},
    repository::{self, RequestRepository},
    trigger::DeploymentTrigger,
};

const BATCH_SIZE: i64 = 10;
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 300;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to poll the dispatch outbox"))]
    PollOutbox { source: sqlx::Error },
    #[snafu(display("failed to mark outbox entry [{id}] processed"))]
    MarkProcessed { source: sqlx::Error, id: i64 },
    #[snafu(display("failed to record outbox attempt for entry [{id}]"))]
    RecordAttempt { source: sqlx::Error, id: i64 },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct OutboxWorker {
    pool: PgPool,
    repository: RequestRepository,
    trigger: DeploymentTrigger,
    poll_interval: Duration,
}

fn backoff(attempts: i32) -> Duration {
    let doublings = attempts.clamp(0, 16) as u32;
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(1u64 << doublings)
        .min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Disposition of a due entry given the ticket's authoritative state.
#[derive(Debug)]
enum EntryAction {
    Dispatch(Request),
    Drop { reason: &'static str },
    Retry { error: repository::Error },
}

/// Decide what to do with a due entry. `loaded` must be a store read; only
/// a store-confirmed stage mismatch may drop the entry, a load failure
/// backs off and keeps it pending.
fn entry_action(loaded: Result<Request, repository::Error>, target: RequestStatus) -> EntryAction {
    match loaded {
        Ok(request) if request.status == target => EntryAction::Dispatch(request),
        Ok(_) => EntryAction::Drop {
            reason: "ticket no longer matches the dispatch target",
        },
        Err(repository::Error::RequestNotFound { .. }) => EntryAction::Drop {
            reason: "ticket was removed underneath the pending dispatch",
        },
        Err(error) => EntryAction::Retry { error },
    }
}

impl OutboxWorker {
    pub fn new(
        pool: PgPool,
        repository: RequestRepository,
        trigger: DeploymentTrigger,
        poll_interval: Duration,
    ) -> Self {
        OutboxWorker {
            pool,
            repository,
            trigger,
            poll_interval,
        }
    }

    /// Run forever, draining due entries once per poll interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = self.drain_due_entries().await {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "outbox pass failed, retrying next interval"
                );
            }
        }
    }

    async fn drain_due_entries(&self) -> Result<()> {
        let due: Vec<OutboxEntry> = sqlx::query_as(
            "SELECT * FROM deploy_outbox \
             WHERE processed_at IS NULL AND next_attempt_at <= NOW() \
             ORDER BY created_at \
             LIMIT $1",
        )
        .bind(BATCH_SIZE)
        .fetch_all(&self.pool)
        .await
        .context(PollOutboxSnafu)?;

        for entry in due {
            self.process_entry(entry).await?;
        }
        Ok(())
    }

    async fn process_entry(&self, entry: OutboxEntry) -> Result<()> {
        // the stage check must not trust the cache: the detached refresh
        // tasks race, and a stale entry can sit there for the full TTL
        let loaded = self.repository.find_in_store(entry.request_id).await;
        match entry_action(loaded, entry.target_status) {
            EntryAction::Dispatch(request) => match self.trigger.dispatch(&request).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %entry.request_id,
                        operation = %entry.operation,
                        attempts = entry.attempts,
                        "dispatch completed"
                    );
                    self.mark_processed(entry.id).await
                }
                Err(error) => {
                    tracing::warn!(
                        request_id = %entry.request_id,
                        operation = %entry.operation,
                        attempts = entry.attempts,
                        error = &error as &dyn std::error::Error,
                        "dispatch failed, backing off"
                    );
                    self.record_attempt(&entry).await
                }
            },
            EntryAction::Drop { reason } => {
                tracing::warn!(
                    request_id = %entry.request_id,
                    target = %entry.target_status,
                    reason,
                    "dropping outbox entry"
                );
                self.mark_processed(entry.id).await
            }
            EntryAction::Retry { error } => {
                tracing::warn!(
                    request_id = %entry.request_id,
                    error = &error as &dyn std::error::Error,
                    "could not load ticket for dispatch, backing off"
                );
                self.record_attempt(&entry).await
            }
        }
    }

    async fn mark_processed(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE deploy_outbox SET processed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context(MarkProcessedSnafu { id })?;
        Ok(())
    }

    async fn record_attempt(&self, entry: &OutboxEntry) -> Result<()> {
        let delay = backoff(entry.attempts);
        sqlx::query(
            "UPDATE deploy_outbox \
             SET attempts = attempts + 1, \
                 next_attempt_at = NOW() + make_interval(secs => $2) \
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .context(RecordAttemptSnafu { id: entry.id })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;
    use uuid::Uuid;

    use super::*;
    use crate::approval::models::Operation;

    #[rstest]
    #[case(0, 5)]
    #[case(1, 10)]
    #[case(2, 20)]
    #[case(5, 160)]
    #[case(6, 300)]
    #[case(40, 300)]
    fn test_backoff_doubles_up_to_the_cap(#[case] attempts: i32, #[case] expected_secs: u64) {
        assert_eq!(backoff(attempts), Duration::from_secs(expected_secs));
    }

    fn ticket(status: RequestStatus) -> Request {
        Request {
            id: 1,
            request_id: Uuid::nil(),
            applicant: "zhang".to_string(),
            business_line: "retail".to_string(),
            service_name: "shop".to_string(),
            image: "registry.local/shop:v1".to_string(),
            replicas: 3,
            template_id: 7,
            purpose: "initial rollout".to_string(),
            operation: Operation::Create,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ticket_at_the_target_stage_is_dispatched() {
        assert!(matches!(
            entry_action(
                Ok(ticket(RequestStatus::K8sApproved)),
                RequestStatus::K8sApproved,
            ),
            EntryAction::Dispatch(_)
        ));
    }

    #[test]
    fn test_only_a_store_confirmed_mismatch_drops_the_entry() {
        // the worker reads the stage from the store, so a mismatch means
        // the ticket really moved on, not that a cache entry lagged behind
        // the decision transaction
        assert!(matches!(
            entry_action(
                Ok(ticket(RequestStatus::SreApproved)),
                RequestStatus::K8sApproved,
            ),
            EntryAction::Drop { .. }
        ));
    }

    #[test]
    fn test_removed_ticket_drops_the_entry() {
        assert!(matches!(
            entry_action(
                Err(repository::Error::RequestNotFound {
                    request_id: Uuid::nil(),
                }),
                RequestStatus::K8sApproved,
            ),
            EntryAction::Drop { .. }
        ));
    }

    #[test]
    fn test_load_failure_backs_off_instead_of_dropping() {
        assert!(matches!(
            entry_action(
                Err(repository::Error::FindRequest {
                    source: sqlx::Error::RowNotFound,
                    request_id: Uuid::nil(),
                }),
                RequestStatus::K8sApproved,
            ),
            EntryAction::Retry { .. }
        ));
    }
}
