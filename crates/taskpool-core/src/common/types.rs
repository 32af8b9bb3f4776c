//! # Task Types
//!
//! Shared types that describe a unit of work and its terminal state. Callers
//! build a [`TaskPayload`], the pool wraps it in a [`Task`] with a
//! correlation [`TaskId`], and a computation unit turns it into a
//! [`TaskResult`].
//!
//! Payloads are strongly typed per kind. Untyped JSON is decoded exactly
//! once, through [`TaskPayload::from_json`], and then checked with
//! [`TaskPayload::validate`] before any unit sees it.

use crate::{
    common::error::{Error, Result},
    protocol::{
        aggregate::{AggregateOutput, AggregatePayload},
        compress::{CompressOutput, CompressPayload},
        hash::{HashOutput, HashPayload},
        schema::{ValidatePayload, ValidationReport},
        text::{TextPayload, TextReport},
        transform::{TransformOutput, TransformPayload},
    },
};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Correlation identifier of a task.
///
/// Unique among the tasks outstanding in one pool. Ids are either assigned
/// by the pool from a monotonic counter or supplied by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six task kinds understood by a computation unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Aggregate,
    Transform,
    TextAnalyze,
    Hash,
    Compress,
    Validate,
}

impl TaskKind {
    pub const ALL: [Self; 6] = [
        Self::Aggregate,
        Self::Transform,
        Self::TextAnalyze,
        Self::Hash,
        Self::Compress,
        Self::Validate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Transform => "transform",
            Self::TextAnalyze => "text_analyze",
            Self::Hash => "hash",
            Self::Compress => "compress",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown task kind `{s}`")))
    }
}

/// Kind-specific input of a task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskPayload {
    Aggregate(AggregatePayload),
    Transform(TransformPayload),
    TextAnalyze(TextPayload),
    Hash(HashPayload),
    Compress(CompressPayload),
    Validate(ValidatePayload),
}

impl TaskPayload {
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Aggregate(_) => TaskKind::Aggregate,
            Self::Transform(_) => TaskKind::Transform,
            Self::TextAnalyze(_) => TaskKind::TextAnalyze,
            Self::Hash(_) => TaskKind::Hash,
            Self::Compress(_) => TaskKind::Compress,
            Self::Validate(_) => TaskKind::Validate,
        }
    }

    /// Decodes an untyped payload for `kind` and checks its shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the value does not decode into the
    /// kind's payload struct or fails [`TaskPayload::validate`].
    pub fn from_json(kind: TaskKind, payload: serde_json::Value) -> Result<Self> {
        let decoded = match kind {
            TaskKind::Aggregate => Self::Aggregate(serde_json::from_value(payload)?),
            TaskKind::Transform => Self::Transform(serde_json::from_value(payload)?),
            TaskKind::TextAnalyze => Self::TextAnalyze(serde_json::from_value(payload)?),
            TaskKind::Hash => Self::Hash(serde_json::from_value(payload)?),
            TaskKind::Compress => Self::Compress(serde_json::from_value(payload)?),
            TaskKind::Validate => Self::Validate(serde_json::from_value(payload)?),
        };
        decoded.validate()?;
        Ok(decoded)
    }

    /// Checks the payload against its kind's shape constraints.
    ///
    /// Unknown sub-operations are not rejected here; they surface as
    /// [`Error::UnsupportedOperation`] when the task executes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Aggregate(p) => p.check(),
            Self::Transform(p) => p.check(),
            Self::TextAnalyze(p) => p.check(),
            Self::Hash(p) => p.check(),
            Self::Compress(p) => p.check(),
            Self::Validate(p) => p.check(),
        }
    }
}

/// A unit of work submitted to the pool.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub submitted_at: Instant,
}

impl Task {
    pub fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            payload,
            submitted_at: Instant::now(),
        }
    }

    pub const fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Time elapsed since the task was submitted.
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Kind-specific output of a successful task.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutput {
    Aggregate(AggregateOutput),
    Transform(TransformOutput),
    TextAnalyze(TextReport),
    Hash(HashOutput),
    Compress(CompressOutput),
    Validate(ValidationReport),
}

impl TaskOutput {
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Aggregate(_) => TaskKind::Aggregate,
            Self::Transform(_) => TaskKind::Transform,
            Self::TextAnalyze(_) => TaskKind::TextAnalyze,
            Self::Hash(_) => TaskKind::Hash,
            Self::Compress(_) => TaskKind::Compress,
            Self::Validate(_) => TaskKind::Validate,
        }
    }
}

/// Terminal state of a task, tagged with the id it was submitted under.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: Result<TaskOutput>,
}

impl TaskResult {
    pub const fn success(task_id: TaskId, output: TaskOutput) -> Self {
        Self {
            task_id,
            outcome: Ok(output),
        }
    }

    pub const fn failure(task_id: TaskId, error: Error) -> Self {
        Self {
            task_id,
            outcome: Err(error),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_outcome(self) -> Result<TaskOutput> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!(matches!(
            "sha256".parse::<TaskKind>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn from_json_decodes_typed_payload() {
        let payload = TaskPayload::from_json(
            TaskKind::Aggregate,
            json!({ "operation": "sum", "numbers": [1, 2.5] }),
        )
        .unwrap();
        assert_eq!(payload.kind(), TaskKind::Aggregate);
        let TaskPayload::Aggregate(p) = payload else {
            panic!("expected aggregate payload");
        };
        assert_eq!(p.numbers, vec![1.0, 2.5]);
        assert_eq!(p.precision, 2);
    }

    #[test]
    fn from_json_rejects_wrong_shape() {
        let err = TaskPayload::from_json(TaskKind::Hash, json!({ "numbers": [1] })).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "{err:?}");

        let err =
            TaskPayload::from_json(TaskKind::Compress, json!({ "text": 42 })).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "{err:?}");
    }

    #[test]
    fn from_json_runs_shape_checks() {
        let err = TaskPayload::from_json(
            TaskKind::Aggregate,
            json!({ "operation": "median", "numbers": [] }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "{err:?}");
    }

    #[test]
    fn task_result_helpers() {
        let ok = TaskResult::failure(TaskId::new(3), Error::Cancelled);
        assert!(!ok.is_success());
        assert_eq!(ok.into_outcome(), Err(Error::Cancelled));
    }
}
