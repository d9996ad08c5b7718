//! Request, task, and verdict types shared by the pipeline and the ingress.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A prompt submitted for a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    pub prompt: String,
    #[serde(default)]
    pub targets: Vec<TargetModel>,
}

impl SendRequest {
    /// A request with no chat and no targets.
    pub fn new(user_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id: None,
            prompt: prompt.into(),
            targets: Vec::new(),
        }
    }
}

/// A model the prompt should be forwarded to once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetModel {
    pub model_id: Uuid,
    pub token: String,
}

/// Body returned by `POST /send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: Verdict,
}

/// A check type, e.g. `external-api`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Links a user to one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTask {
    pub user_id: Uuid,
    pub task: Task,
}

impl UserTask {
    pub fn new(user_id: Uuid, kind: impl Into<String>) -> Self {
        Self {
            user_id,
            task: Task { kind: kind.into() },
        }
    }

    pub fn task_type(&self) -> &str {
        &self.task.kind
    }
}

/// How a single check ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The check accepted the prompt.
    Passed,
    /// The check conclusively rejected the prompt.
    Rejected,
    /// The check could not run to a decision (network fault, bad response, timeout).
    Errored(String),
    /// No check is registered for the task type.
    Unregistered,
}

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_type: String,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn new(task_type: impl Into<String>, outcome: TaskOutcome) -> Self {
        Self {
            task_type: task_type.into(),
            outcome,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == TaskOutcome::Passed
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Errored(e) => Some(e),
            _ => None,
        }
    }
}

/// Final decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Benign,
    Malicious,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Benign => "benign",
            Verdict::Malicious => "malicious",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "benign" => Ok(Verdict::Benign),
            "malicious" => Ok(Verdict::Malicious),
            other => Err(format!("unknown verdict: {other}")),
        }
    }
}
