use std::str::FromStr;

use crate::models::{TaskOutcome, TaskResult, Verdict};

/// What to do with a task whose type has no registered check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownCheckPolicy {
    /// Count it as a failure, so the prompt is rejected.
    #[default]
    FailClosed,
    /// Log it and leave the verdict to the other checks.
    Ignore,
}

impl FromStr for UnknownCheckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-closed" | "reject" => Ok(UnknownCheckPolicy::FailClosed),
            "ignore" | "fail-open" => Ok(UnknownCheckPolicy::Ignore),
            other => Err(format!(
                "unknown policy {other:?}, expected fail-closed or ignore"
            )),
        }
    }
}

/// Decisions that are not made by any check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Verdict when the user has no tasks or they could not be fetched.
    pub on_missing_checks: Verdict,
    pub on_unknown_check: UnknownCheckPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            on_missing_checks: Verdict::Benign,
            on_unknown_check: UnknownCheckPolicy::FailClosed,
        }
    }
}

impl Policy {
    /// Whether this result decides the run as malicious.
    pub fn is_failure(&self, result: &TaskResult) -> bool {
        match result.outcome {
            TaskOutcome::Passed => false,
            TaskOutcome::Rejected | TaskOutcome::Errored(_) => true,
            TaskOutcome::Unregistered => self.on_unknown_check == UnknownCheckPolicy::FailClosed,
        }
    }
}
