//! Run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{Status, aggregate};

/// One triggered execution of a pipeline
///
/// `finished_at` is set if and only if `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: i64,
    pub pipeline_id: i64,
    pub status: Status,
    pub triggered_by: Option<String>,
    pub commit_sha: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Recompute this run's status from its jobs' statuses.
    ///
    /// Returns `true` when any field changed. With no jobs the run is left untouched.
    pub fn apply_aggregate(&mut self, statuses: &[Status], now: DateTime<Utc>) -> bool {
        let Some(next) = aggregate(statuses.iter().copied()) else {
            return false;
        };

        let before = (self.status, self.started_at, self.finished_at);

        if self.started_at.is_none() {
            self.started_at = Some(now);
        }

        if next.is_terminal() {
            if self.status != next || self.finished_at.is_none() {
                self.finished_at = Some(now);
            }
        } else {
            self.finished_at = None;
        }
        self.status = next;

        before != (self.status, self.started_at, self.finished_at)
    }

    /// Move the run to `running` because one of its jobs was claimed.
    ///
    /// Any other status transitions, including a finished run whose deploy
    /// job was just picked up; `finished_at` is cleared with it.
    pub fn mark_started(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == Status::Running {
            return false;
        }
        self.status = Status::Running;
        self.finished_at = None;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        true
    }

    /// Force the run into `canceled`. Terminal runs are not modified.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = Status::Canceled;
        self.finished_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn queued_run() -> Run {
        Run {
            id: 1,
            pipeline_id: 1,
            status: Status::Queued,
            triggered_by: None,
            commit_sha: None,
            git_ref: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_apply_aggregate_success_sets_timestamps() {
        let mut run = queued_run();
        let now = Utc::now();

        assert!(run.apply_aggregate(&[Status::Success], now));
        assert_eq!(run.status, Status::Success);
        assert_eq!(run.started_at, Some(now));
        assert_eq!(run.finished_at, Some(now));
    }

    #[test]
    fn test_apply_aggregate_is_idempotent() {
        let mut run = queued_run();
        let first = Utc::now();
        run.apply_aggregate(&[Status::Failed, Status::Success], first);

        let later = first + Duration::seconds(10);
        assert!(!run.apply_aggregate(&[Status::Failed, Status::Success], later));
        assert_eq!(run.finished_at, Some(first));
    }

    #[test]
    fn test_apply_aggregate_clears_finished_when_active() {
        let mut run = queued_run();
        let now = Utc::now();
        run.apply_aggregate(&[Status::Success], now);

        // A deploy job appended afterwards reopens the run
        assert!(run.apply_aggregate(&[Status::Success, Status::Queued], now));
        assert_eq!(run.status, Status::Running);
        assert_eq!(run.finished_at, None);
    }

    #[test]
    fn test_apply_aggregate_without_jobs_is_noop() {
        let mut run = queued_run();
        assert!(!run.apply_aggregate(&[], Utc::now()));
        assert_eq!(run.status, Status::Queued);
    }

    #[test]
    fn test_mark_started_from_queued() {
        let mut run = queued_run();
        let now = Utc::now();
        assert!(run.mark_started(now));
        assert_eq!(run.status, Status::Running);
        assert_eq!(run.started_at, Some(now));

        assert!(!run.mark_started(Utc::now()));
    }

    #[test]
    fn test_mark_started_reopens_finished_run() {
        let mut run = queued_run();
        let first = Utc::now();
        run.apply_aggregate(&[Status::Success], first);

        assert!(run.mark_started(first + Duration::seconds(5)));
        assert_eq!(run.status, Status::Running);
        assert_eq!(run.started_at, Some(first));
        assert_eq!(run.finished_at, None);
    }

    #[test]
    fn test_cancel_skips_terminal_runs() {
        let mut run = queued_run();
        run.status = Status::Failed;
        assert!(!run.cancel(Utc::now()));
        assert_eq!(run.status, Status::Failed);

        let mut run = queued_run();
        assert!(run.cancel(Utc::now()));
        assert_eq!(run.status, Status::Canceled);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_run_serializes_ref_field() {
        let mut run = queued_run();
        run.git_ref = Some("main".to_string());
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["ref"], "main");
        assert_eq!(value["pipelineId"], 1);
    }
}
