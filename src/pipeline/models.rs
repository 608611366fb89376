//! Artifacts, run-scoped records, and the externally visible event stream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::StageId;

/// A stage's persisted output.
///
/// `Structured` carries the parsed value when extraction succeeded;
/// `Degraded` carries the backend's raw text verbatim when it did not.
/// The explicit tag lets consumers detect degradation instead of trusting
/// fallback content as if it conformed to the expected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Structured { stage: StageId, value: Value },
    Degraded { stage: StageId, raw: String },
}

impl Artifact {
    pub fn stage(&self) -> StageId {
        match self {
            Artifact::Structured { stage, .. } | Artifact::Degraded { stage, .. } => *stage,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Artifact::Degraded { .. })
    }
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Done,
    Error,
}

/// Transient per-stage record inside one run.
///
/// Not durable — persisted state is only the artifact.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: StageId,
    pub status: StageStatus,
    pub artifact: Option<Artifact>,
    pub timestamp: String,
}

impl StageResult {
    pub fn done(stage: StageId, artifact: Artifact) -> Self {
        Self {
            stage,
            status: StageStatus::Done,
            artifact: Some(artifact),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::Error,
            artifact: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// One invocation's ordered stage results.
///
/// Created when a run starts and dropped when its stream closes; never
/// persisted.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub results: Vec<StageResult>,
}

impl PipelineRun {
    pub fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn completed_stages(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == StageStatus::Done)
            .count()
    }
}

/// Events pushed to the progress stream, one per notification.
///
/// A stream that terminates without `run-complete` is an aborted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PipelineEvent {
    StageRunning { stage: StageId },
    StageDone { stage: StageId, artifact: Artifact },
    StageError { message: String },
    RunComplete {},
}

impl PipelineEvent {
    /// Discriminator string, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::StageRunning { .. } => "stage-running",
            PipelineEvent::StageDone { .. } => "stage-done",
            PipelineEvent::StageError { .. } => "stage-error",
            PipelineEvent::RunComplete {} => "run-complete",
        }
    }
}
