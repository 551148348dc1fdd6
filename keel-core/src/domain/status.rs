//! Lifecycle status shared by runs and jobs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a run or a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Queued,
        Status::Running,
        Status::Success,
        Status::Failed,
        Status::Canceled,
    ];

    /// Terminal statuses never transition again (except through an explicit requeue).
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "success" => Ok(Status::Success),
            "failed" => Ok(Status::Failed),
            "canceled" => Ok(Status::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Compute a run's status from the statuses of its jobs.
///
/// Rules are applied in order:
/// 1. any `failed` wins
/// 2. any `queued` or `running` keeps the run `running`
/// 3. all `success` (and at least one job) gives `success`
/// 4. any `canceled` gives `canceled`
///
/// Returns `None` when there are no jobs, meaning the run status is left as is.
/// The result depends only on the multiset of inputs, so duplicate or
/// out-of-order finishes converge to the same answer.
pub fn aggregate<I>(statuses: I) -> Option<Status>
where
    I: IntoIterator<Item = Status>,
{
    let mut total = 0usize;
    let mut failed = false;
    let mut active = false;
    let mut success = 0usize;
    let mut canceled = false;

    for status in statuses {
        total += 1;
        match status {
            Status::Failed => failed = true,
            Status::Queued | Status::Running => active = true,
            Status::Success => success += 1,
            Status::Canceled => canceled = true,
        }
    }

    if failed {
        Some(Status::Failed)
    } else if active {
        Some(Status::Running)
    } else if total > 0 && success == total {
        Some(Status::Success)
    } else if canceled {
        Some(Status::Canceled)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status::*;

    #[test]
    fn test_aggregate_pending_job_keeps_run_running() {
        assert_eq!(aggregate([Success, Success, Queued]), Some(Running));
        assert_eq!(aggregate([Running]), Some(Running));
    }

    #[test]
    fn test_aggregate_all_success() {
        assert_eq!(aggregate([Success, Success]), Some(Success));
    }

    #[test]
    fn test_aggregate_failure_wins() {
        assert_eq!(aggregate([Failed, Success]), Some(Failed));
        assert_eq!(aggregate([Queued, Failed, Canceled]), Some(Failed));
    }

    #[test]
    fn test_aggregate_canceled() {
        assert_eq!(aggregate([Canceled]), Some(Canceled));
        assert_eq!(aggregate([Success, Canceled]), Some(Canceled));
    }

    #[test]
    fn test_aggregate_empty_is_unchanged() {
        assert_eq!(aggregate(Vec::new()), None);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let forward = aggregate([Success, Canceled, Running]);
        let backward = aggregate([Running, Canceled, Success]);
        assert_eq!(forward, backward);
        assert_eq!(forward, Some(Running));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!Queued.is_terminal());
        assert!(!Running.is_terminal());
        assert!(Success.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Canceled.is_terminal());
    }
}
