//! Generation job status transitions
//!
//! `Queued -> Running -> {Succeeded | Failed}` and
//! `Queued | Running -> CancelRequested -> {Cancelled | Succeeded}`.
//! Snapshots are sampled by polling, so a snapshot may skip intermediate
//! states; the table below is the reachability closure of those edges.
//! No transition leaves a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-reported job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Queued,
    /// Generating
    Running,
    /// Cancellation requested, not yet resolved
    CancelRequested,
    /// Finished with drafts
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled before finishing
    Cancelled,
}

impl JobStatus {
    /// Polling continues while the job is active
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::CancelRequested)
    }

    /// Terminal states never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Retry is only meaningful after failure or cancellation
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::CancelRequested => "cancel requested",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Statuses a snapshot may move to from `from`
#[must_use]
pub fn allowed_transitions(from: JobStatus) -> Vec<JobStatus> {
    use JobStatus::*;
    match from {
        Queued => vec![Running, CancelRequested, Succeeded, Failed, Cancelled],
        Running => vec![CancelRequested, Succeeded, Failed, Cancelled],
        // a cancellation may lose the race; adopt whatever terminal state the server reports
        CancelRequested => vec![Cancelled, Succeeded, Failed],
        Succeeded | Failed | Cancelled => vec![],
    }
}

/// Check whether a snapshot with status `to` may replace one with status `from`
///
/// Re-reporting the same active status (a progress update) is always allowed.
#[must_use]
pub fn is_allowed(from: JobStatus, to: JobStatus) -> bool {
    (from == to && from.is_active()) || allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Queued),
            Just(JobStatus::Running),
            Just(JobStatus::CancelRequested),
            Just(JobStatus::Succeeded),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    #[test]
    fn forward_path() {
        assert!(is_allowed(JobStatus::Queued, JobStatus::Running));
        assert!(is_allowed(JobStatus::Running, JobStatus::Running));
        assert!(is_allowed(JobStatus::Running, JobStatus::Succeeded));
        assert!(is_allowed(JobStatus::CancelRequested, JobStatus::Succeeded));
    }

    #[test]
    fn no_going_back() {
        assert!(!is_allowed(JobStatus::Running, JobStatus::Queued));
        assert!(!is_allowed(JobStatus::CancelRequested, JobStatus::Running));
        assert!(!is_allowed(JobStatus::Succeeded, JobStatus::Succeeded));
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&JobStatus::CancelRequested).unwrap(),
            "\"cancel_requested\""
        );
    }

    proptest! {
        #[test]
        fn prop_terminal_states_are_final(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!is_allowed(from, to));
            }
        }

        #[test]
        fn prop_active_states_can_always_finish(from in any_status()) {
            if from.is_active() {
                prop_assert!(allowed_transitions(from).iter().any(|s| s.is_terminal()));
            }
        }
    }
}
