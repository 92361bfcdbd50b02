//! The fixed stage graph. Pure functions only, so every combination is
//! trivially testable.

use super::models::{ApproverRole, Decision, RequestStatus};

/// Look up the next stage for a decision. `None` means the combination is
/// not in the table and must be rejected as an invalid transition.
pub fn next_status(
    current: RequestStatus,
    role: ApproverRole,
    decision: Decision,
) -> Option<RequestStatus> {
    match (current, role, decision) {
        (RequestStatus::Pending, ApproverRole::Ops, Decision::Approve) => {
            Some(RequestStatus::OpsApproved)
        }
        (RequestStatus::Pending, ApproverRole::Ops, Decision::Reject) => {
            Some(RequestStatus::OpsRejected)
        }
        (RequestStatus::OpsApproved, ApproverRole::Sre, Decision::Approve) => {
            Some(RequestStatus::SreApproved)
        }
        (RequestStatus::OpsApproved, ApproverRole::Sre, Decision::Reject) => {
            Some(RequestStatus::SreRejected)
        }
        (RequestStatus::SreApproved, ApproverRole::K8s, Decision::Approve) => {
            Some(RequestStatus::K8sApproved)
        }
        (RequestStatus::SreApproved, ApproverRole::K8s, Decision::Reject) => {
            Some(RequestStatus::K8sRejected)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[rstest]
    #[case(RequestStatus::Pending, ApproverRole::Ops, Decision::Approve, RequestStatus::OpsApproved)]
    #[case(RequestStatus::Pending, ApproverRole::Ops, Decision::Reject, RequestStatus::OpsRejected)]
    #[case(RequestStatus::OpsApproved, ApproverRole::Sre, Decision::Approve, RequestStatus::SreApproved)]
    #[case(RequestStatus::OpsApproved, ApproverRole::Sre, Decision::Reject, RequestStatus::SreRejected)]
    #[case(RequestStatus::SreApproved, ApproverRole::K8s, Decision::Approve, RequestStatus::K8sApproved)]
    #[case(RequestStatus::SreApproved, ApproverRole::K8s, Decision::Reject, RequestStatus::K8sRejected)]
    fn test_legal_transitions(
        #[case] current: RequestStatus,
        #[case] role: ApproverRole,
        #[case] decision: Decision,
        #[case] expected: RequestStatus,
    ) {
        assert_eq!(next_status(current, role, decision), Some(expected));
    }

    #[test]
    fn test_everything_outside_the_table_is_rejected() {
        let legal = [
            (RequestStatus::Pending, ApproverRole::Ops),
            (RequestStatus::OpsApproved, ApproverRole::Sre),
            (RequestStatus::SreApproved, ApproverRole::K8s),
        ];
        for current in RequestStatus::iter() {
            for role in ApproverRole::iter() {
                for decision in Decision::iter() {
                    let expected_legal = legal.contains(&(current, role));
                    assert_eq!(
                        next_status(current, role, decision).is_some(),
                        expected_legal,
                        "({current}, {role}, {decision})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_stages_admit_no_transition() {
        for current in RequestStatus::iter().filter(RequestStatus::is_terminal) {
            for role in ApproverRole::iter() {
                for decision in Decision::iter() {
                    assert_eq!(next_status(current, role, decision), None);
                }
            }
        }
    }
}
